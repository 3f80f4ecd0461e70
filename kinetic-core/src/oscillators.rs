//! Phase-accumulating wave source.
//!
//! One `WaveSource` serves as partial oscillator, LFO and sample player:
//! - periodic waveforms read a phase in `[0, 2π)` advanced once per sample
//! - `Noise` holds one random value per cycle
//! - `StereoSample` walks an interleaved L/R buffer, either one frame per tick
//!   (`update_stereo_fixed_speed`) or at a fractional, linearly interpolated speed
//!   (`update_stereo`)
//!
//! Waveforms are naive (not band-limited).

use std::f64::consts::PI;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::dsp::{fast_sin, frequency_to_phase_speed, lerp, DIV_PI, DIV_TAU, TAU};
use crate::sound::{Frequency, Sample, StereoSample};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WaveType {
    Sine,
    Square,
    Pulse,
    Noise,
    Triangular,
    Saw,
    ReverseSaw,
    MultiSaw,
    StereoSample,
}

const MULTI_SAW_SMALL_SAWS: f64 = 4.0;
const MULTI_SAW_SMALL_AMPLITUDE: f64 = 0.2;

#[derive(Clone, Debug)]
pub struct WaveSource {
    wave_type:       WaveType,
    sample_duration: f64,
    phase:           f64,   // radians, [0, 2π)
    phase_speed:     f64,   // radians per sample
    pulse_width:     f64,
    held:            Sample, // noise value for the current cycle
    sample:          Option<Arc<[Sample]>>,
    sample_index:    usize,
}

impl WaveSource {
    pub fn new(wave_type: WaveType, sample_rate: Frequency) -> Self {
        Self {
            wave_type,
            sample_duration: 1.0 / sample_rate,
            phase: 0.0,
            phase_speed: 0.0,
            pulse_width: 0.5,
            held: 0.0,
            sample: None,
            sample_index: 0,
        }
    }

    #[inline] pub fn set_type(&mut self, wave_type: WaveType) { self.wave_type = wave_type; }
    #[inline] pub fn set_pulse_width(&mut self, pw: f64) { self.pulse_width = pw; }
    #[inline] pub fn set_phase(&mut self, phase: f64) { self.phase = phase; }
    /// Angular velocity in radians per second.
    #[inline] pub fn set_phase_speed(&mut self, rad_per_sec: f64) { self.phase_speed = rad_per_sec * self.sample_duration; }
    #[inline] pub fn set_frequency(&mut self, freq: Frequency) { self.phase_speed = frequency_to_phase_speed(freq) * self.sample_duration; }

    #[inline] pub fn wave_type(&self) -> WaveType { self.wave_type }
    #[inline] pub fn phase(&self) -> f64 { self.phase }
    #[inline] pub fn pulse_width(&self) -> f64 { self.pulse_width }

    /// True on the tick the phase wrapped.
    #[inline] pub fn is_starting_new_cycle(&self) -> bool { self.phase - self.phase_speed < 0.0 }

    /// Attach an interleaved stereo buffer and rewind.
    pub fn set_sample(&mut self, buffer: Arc<[Sample]>) {
        self.phase = 0.0;
        self.sample_index = 0;
        self.sample = Some(buffer);
    }

    /// Playback speed relative to the buffer's native rate (1.0 = one frame per tick).
    pub fn set_sample_play_speed(&mut self, multiplier: f64) {
        let len = self.sample_len();
        self.phase_speed = if len > 0 { 4.0 * PI * multiplier / len as f64 } else { 0.0 };
    }

    #[inline]
    fn sample_len(&self) -> usize {
        self.sample.as_ref().map_or(0, |s| s.len())
    }

    pub fn sample_finished(&self) -> bool {
        self.phase >= TAU || self.sample_index >= self.sample_len()
    }

    /// Advance one tick and return the periodic waveform value.
    pub fn update(&mut self) -> Sample {
        self.phase = (self.phase + self.phase_speed) % TAU;
        let p = self.phase;

        match self.wave_type {
            WaveType::Sine => fast_sin(p),
            WaveType::Noise => {
                if self.is_starting_new_cycle() {
                    self.held = rand::thread_rng().gen_range(-1.0..=1.0);
                }
                self.held
            }
            WaveType::Pulse => {
                if p * DIV_TAU < self.pulse_width { 1.0 } else { 0.0 }
            }
            WaveType::Triangular => 1.0 - (p * DIV_PI - 1.0).abs(),
            WaveType::Saw => -1.0 + ((p + PI) % TAU) * DIV_PI,
            WaveType::ReverseSaw => -1.0 + ((TAU - p + PI) % TAU) * DIV_PI,
            WaveType::MultiSaw => {
                let div = DIV_TAU * (2.0 + MULTI_SAW_SMALL_SAWS * MULTI_SAW_SMALL_AMPLITUDE);
                let passed = (p * DIV_TAU * (MULTI_SAW_SMALL_SAWS + 1.0)).floor();
                -1.0 + ((p + PI) % TAU) * div - passed * MULTI_SAW_SMALL_AMPLITUDE
            }
            WaveType::Square => 1.0 - 2.0 * (p * DIV_TAU).round(),
            WaveType::StereoSample => {
                debug_assert!(false, "stereo sample sources are read with update_stereo");
                0.0
            }
        }
    }

    /// Interpolated playback at the speed set by `set_sample_play_speed`.
    pub fn update_stereo(&mut self) -> StereoSample {
        debug_assert_eq!(self.wave_type, WaveType::StereoSample);
        let Some(buf) = self.sample.as_ref() else {
            return StereoSample::default();
        };
        let frames = buf.len() / 2;
        self.phase += self.phase_speed;
        if self.phase > TAU || frames == 0 {
            return StereoSample::default();
        }

        let pos = self.phase * DIV_TAU * frames as f64;
        let t = pos - pos.floor();
        let f1 = (pos.floor() as usize).min(frames - 1);
        let f2 = (pos.ceil() as usize).min(frames - 1);
        StereoSample::new(
            lerp(buf[2 * f1], buf[2 * f2], t),
            lerp(buf[2 * f1 + 1], buf[2 * f2 + 1], t),
        )
    }

    /// One frame per tick.
    pub fn update_stereo_fixed_speed(&mut self) -> StereoSample {
        debug_assert_eq!(self.wave_type, WaveType::StereoSample);
        let Some(buf) = self.sample.as_ref() else {
            return StereoSample::default();
        };
        if self.sample_index + 1 >= buf.len() {
            self.sample_index = buf.len();
            return StereoSample::default();
        }
        let out = StereoSample::new(buf[self.sample_index], buf[self.sample_index + 1]);
        self.sample_index += 2;
        out
    }
}
