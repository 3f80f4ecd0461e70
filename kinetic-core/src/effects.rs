//! Output-stage effects: a feedback multi-tap delay and a lookahead limiter.
//!
//! Both work on one or two channels. Mono callers use `update`, stereo callers
//! `update_stereo`; mixing the two on one instance is a logic error.

use crate::buffers::{BackPos, CircularBuffer, CircularSummedBuffer};
use crate::dsp::round_up_even;
use crate::sound::{Frequency, Sample, StereoSample, Time, Volume};

const MAX_CHANNELS: usize = 2;

// ---------------------------------- Delays ---------------------------------------

/// One tap of [`Delays`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DelayTap {
    pub volume:          [Volume; MAX_CHANNELS],
    pub feedback_volume: Volume,
    pub delay:           Time,
    pub delay_back_pos:  BackPos,
    /// Window length averaged at the tap (1 = single sample).
    pub take_average:    BackPos,
}

/// Multi-tap delay over per-channel summed buffers.
///
/// Each tap reads `delay_back_pos` samples back (averaged over `take_average` samples,
/// a cheap lowpass), adds to the wet output and to the feedback sum. The feedback is
/// injected into the newest sample minus its own slow moving average, so a constant
/// feedback offset can't build up.
#[derive(Clone, Debug)]
pub struct Delays {
    sample_rate:       Frequency,
    channels:          usize,
    buffer_size:       usize,
    taps:              Vec<DelayTap>,
    buffers:           Vec<CircularSummedBuffer<Sample>>,
    current_output:    [Sample; MAX_CHANNELS],
    smoothed_feedback: [Sample; MAX_CHANNELS],
}

impl Delays {
    pub const FEEDBACK_SMOOTH_FACTOR: Sample = 0.0001;
    /// Feedback sum beyond this means the taps are misconfigured.
    pub const MAX_FEEDBACK: Sample = 3.0;

    pub fn new(channels: usize, buffer_len: Time, sample_rate: Frequency) -> Self {
        assert!((1..=MAX_CHANNELS).contains(&channels), "delays support 1 or 2 channels, got {channels}");
        let buffer_size = (buffer_len * sample_rate) as usize + 1;
        let buffers = (0..channels)
            .map(|_| {
                let mut b = CircularSummedBuffer::new(buffer_size, true);
                b.fill_with(0.0);
                b
            })
            .collect();
        Self {
            sample_rate,
            channels,
            buffer_size,
            taps: Vec::new(),
            buffers,
            current_output: [0.0; MAX_CHANNELS],
            smoothed_feedback: [0.0; MAX_CHANNELS],
        }
    }

    /// Add a tap. Negative delays and volumes are clamped to zero.
    pub fn add_delay(&mut self, delay: Time, volume: Volume, feedback_volume: Volume, take_average: BackPos) {
        let delay = delay.max(0.0);
        let volume = volume.max(0.0);
        let tap = DelayTap {
            volume: [volume; MAX_CHANNELS],
            feedback_volume,
            delay,
            delay_back_pos: (delay * self.sample_rate) as BackPos,
            take_average: take_average.max(1),
        };
        assert!(
            tap.delay_back_pos + tap.take_average - 1 < self.buffer_size,
            "delay tap at {delay}s reaches past the {}-sample buffer",
            self.buffer_size
        );
        self.taps.push(tap);
    }

    #[inline] pub fn taps(&self) -> &[DelayTap] { &self.taps }
    #[inline] pub fn taps_mut(&mut self) -> &mut Vec<DelayTap> { &mut self.taps }
    #[inline] pub fn clear(&mut self) { self.taps.clear(); }

    #[inline] pub fn current_output(&self) -> Sample { self.current_output[0] }

    #[inline]
    pub fn current_stereo_output(&self) -> StereoSample {
        StereoSample::new(self.current_output[0], self.current_output[self.channels - 1])
    }

    pub fn update(&mut self, input: Sample) -> Sample {
        debug_assert_eq!(self.channels, 1);
        self.update_internal(&[input]);
        self.current_output[0]
    }

    pub fn update_stereo(&mut self, input: StereoSample) -> StereoSample {
        debug_assert_eq!(self.channels, 2);
        self.update_internal(&[input.left, input.right]);
        self.current_stereo_output()
    }

    fn update_internal(&mut self, input: &[Sample]) {
        for (buf, &x) in self.buffers.iter_mut().zip(input) {
            buf.push(x);
        }

        for ch in 0..self.channels {
            let buf = &mut self.buffers[ch];
            let mut out = 0.0;
            let mut feedback = 0.0;

            for tap in self.taps.iter().filter(|t| t.volume[ch] > 0.0) {
                let delayed = if tap.take_average > 1 {
                    buf.get_average(tap.delay_back_pos, tap.delay_back_pos + tap.take_average - 1)
                } else {
                    buf.get(tap.delay_back_pos)
                };
                out += delayed * tap.volume[ch];
                feedback += delayed * tap.feedback_volume;
                assert!(feedback.abs() <= Self::MAX_FEEDBACK, "delay feedback ran away: {feedback}");
            }

            let smoothed = &mut self.smoothed_feedback[ch];
            *smoothed = feedback * Self::FEEDBACK_SMOOTH_FACTOR + *smoothed * (1.0 - Self::FEEDBACK_SMOOTH_FACTOR);
            buf.add_to_last(feedback - *smoothed);

            self.current_output[ch] = out;
        }
    }
}

// -------------------------------- Compressor -------------------------------------

/// Lookahead limiter.
///
/// Input is delayed by `round_up_even(0.02·sr)` samples. Every half window the gain
/// starts a linear ramp toward the smallest gain the last two half windows needed to
/// keep every sample under [`Compressor::MAX_OUTPUT_LEVEL`]; the delay lets the ramp
/// finish before the loud sample comes out.
#[derive(Clone, Debug)]
pub struct Compressor {
    channels:       usize,
    level:          Volume,
    min_level:      Volume,
    prev_min_level: Volume,
    level_step:     Volume,
    delay:          BackPos,
    buffers:        Vec<CircularBuffer<Sample>>,
    current_output: [Sample; MAX_CHANNELS],
}

impl Compressor {
    pub const DELAY: Time = 0.02;
    pub const MAX_OUTPUT_LEVEL: Volume = 0.9999;

    pub fn new(channels: usize, sample_rate: Frequency) -> Self {
        assert!((1..=MAX_CHANNELS).contains(&channels), "compressor supports 1 or 2 channels, got {channels}");
        let delay = round_up_even((Self::DELAY * sample_rate) as usize);
        assert!(delay >= 2, "sample rate {sample_rate} too low for the compressor window");
        let buffers = (0..channels)
            .map(|_| {
                let mut b = CircularBuffer::new(delay + 1, true);
                b.fill_with(0.0);
                b
            })
            .collect();
        Self {
            channels,
            level: Self::MAX_OUTPUT_LEVEL,
            min_level: Self::MAX_OUTPUT_LEVEL,
            prev_min_level: Self::MAX_OUTPUT_LEVEL,
            level_step: 0.0,
            delay,
            buffers,
            current_output: [0.0; MAX_CHANNELS],
        }
    }

    /// Lookahead latency in samples.
    #[inline] pub fn delay(&self) -> BackPos { self.delay }
    #[inline] pub fn level(&self) -> Volume { self.level }

    pub fn update(&mut self, input: Sample) -> Sample {
        debug_assert_eq!(self.channels, 1);
        self.update_internal(&[input]);
        self.current_output[0]
    }

    pub fn update_stereo(&mut self, input: StereoSample) -> StereoSample {
        debug_assert_eq!(self.channels, 2);
        self.update_internal(&[input.left, input.right]);
        StereoSample::new(self.current_output[0], self.current_output[1])
    }

    fn update_internal(&mut self, input: &[Sample]) {
        let half = self.delay / 2;
        if self.buffers[0].timestamp() % half as i64 == 0 {
            let next_min = self.min_level.min(self.prev_min_level);
            self.level_step = (next_min - self.level) / half as f64;
            self.prev_min_level = self.min_level;
            self.min_level = Self::MAX_OUTPUT_LEVEL;
        }

        for (buf, &x) in self.buffers.iter_mut().zip(input) {
            buf.push(x);
            let a = x.abs();
            if a > Self::MAX_OUTPUT_LEVEL {
                self.min_level = self.min_level.min(Self::MAX_OUTPUT_LEVEL / a);
            }
        }

        self.level += self.level_step;

        for ch in 0..self.channels {
            let out = *self.buffers[ch].get(self.delay) * self.level;
            assert!(out.abs() <= Self::MAX_OUTPUT_LEVEL + 1e-4, "compressor output {out} over ceiling");
            self.current_output[ch] = out;
        }
    }
}
