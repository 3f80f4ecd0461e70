//! One oscillator of an additive voice, with its followers and LFOs.
//!
//! A `Partial` is ticked by its owning instrument in a fixed order: [`Partial::modulate`]
//! (followers, tremolo, vibrato, frequency), [`Partial::oscillate`] (pulse width, waveform,
//! wave filter), then the instrument's own shaping ([`Partial::low_pass`], envelope, clip).

use kinetic_core::prelude::*;

use crate::tuning::PartialTuning;

pub const VOLUME_SPRING: (f64, f64) = (0.0001, 0.95);
pub const LFO_SPRING: (f64, f64) = (0.001, 0.4);
pub const LOW_PASS_SPRING: (f64, f64) = (0.1, 0.97);
pub const POWER_VOLUME_SPRING: (f64, f64) = (0.001, 0.4);

pub const MIN_PARTIAL_FREQUENCY: Frequency = 20.0;
pub const MAX_PARTIAL_FREQUENCY: Frequency = 20_000.0;

/// How the three pulse-width LFOs are blended: `width = base + depth · Σ wᵢ·lfoᵢ`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PulseShape {
    pub weights: [f64; 3],
    pub depth: f64,
}

/// Per-tick modulation state handed back to the instrument.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Modulation {
    pub volume: Volume,
    pub tremolo: f64,
    /// Smoothed frequency before vibrato.
    pub frequency: Frequency,
}

#[derive(Clone, Debug)]
pub struct Partial {
    tuning: PartialTuning,
    left: Volume,
    right: Volume,

    wave: WaveSource,
    tremolo: WaveSource,
    vibrato: WaveSource,
    pulse_lfos: Option<[WaveSource; 3]>,
    power_lfo: Option<WaveSource>,

    pub freq: Stepper,
    pub volume: Stepper,
    pub power_volume: Stepper,
    lfo_freq: Stepper,
    lfo_volume: Stepper,
    low_pass: Stepper,
    wave_filter: Option<Stepper>,

    sample_duration: Time,
}

fn sine_lfo(frequency: Frequency, phase_deg: f64, sample_rate: Frequency) -> WaveSource {
    let mut lfo = WaveSource::new(WaveType::Sine, sample_rate);
    lfo.set_frequency(frequency);
    lfo.set_phase(deg_to_rad(phase_deg));
    lfo
}

impl Partial {
    pub fn new(tuning: PartialTuning, sample_rate: Frequency) -> Self {
        let mut wave = WaveSource::new(tuning.wave, sample_rate);
        wave.set_phase(deg_to_rad(tuning.phase));
        wave.set_pulse_width(tuning.pulse_width);

        let pulse_lfos = match (tuning.wave, tuning.pulse_lfo_frequencies) {
            (WaveType::Pulse, Some([f1, f2, f3])) => Some([
                sine_lfo(f1, 0.0, sample_rate),
                sine_lfo(f2, 30.0, sample_rate),
                sine_lfo(f3, 53.0, sample_rate),
            ]),
            _ => None,
        };
        let power_lfo = tuning.power_lfo.map(|p| sine_lfo(p.frequency, p.phase, sample_rate));

        Self {
            left: tuning.left,
            right: tuning.right,
            wave,
            tremolo: sine_lfo(tuning.lfo_frequency, tuning.tremolo_phase, sample_rate),
            vibrato: sine_lfo(tuning.lfo_frequency, tuning.vibrato_phase, sample_rate),
            pulse_lfos,
            power_lfo,
            freq: Stepper::new(0.0).with_half_step(tuning.freq_half_step),
            volume: Stepper::new(0.0).with_spring(VOLUME_SPRING.0, VOLUME_SPRING.1),
            power_volume: Stepper::new(0.0).with_spring(POWER_VOLUME_SPRING.0, POWER_VOLUME_SPRING.1),
            lfo_freq: Stepper::new(tuning.lfo_frequency).with_spring(LFO_SPRING.0, LFO_SPRING.1),
            lfo_volume: Stepper::new(tuning.lfo_volume).with_spring(LFO_SPRING.0, LFO_SPRING.1),
            low_pass: Stepper::new(0.0).with_spring(LOW_PASS_SPRING.0, LOW_PASS_SPRING.1),
            wave_filter: tuning.wave_filter_half_step.map(|h| Stepper::new(0.0).with_half_step(h)),
            sample_duration: 1.0 / sample_rate,
            tuning,
        }
    }

    #[inline] pub fn tuning(&self) -> &PartialTuning { &self.tuning }
    #[inline] pub fn multiplier(&self) -> f64 { self.tuning.multiplier }
    #[inline] pub fn is_silent(&self) -> bool { self.left == 0.0 && self.right == 0.0 }

    /// Silence for notes whose overtone falls outside the audible band.
    pub fn mute(&mut self) {
        self.left = 0.0;
        self.right = 0.0;
    }

    pub fn unmute(&mut self) {
        self.left = self.tuning.left;
        self.right = self.tuning.right;
    }

    /// Step the volume, LFO and frequency followers and retune the oscillator.
    pub fn modulate(&mut self) -> Modulation {
        self.volume.update_movement(self.sample_duration);
        let volume = self.volume.update_lagged();

        let lfo_volume = self.lfo_volume.update_lagged();
        let lfo_freq = self.lfo_freq.update_lagged();
        self.tremolo.set_frequency(lfo_freq);
        self.vibrato.set_frequency(lfo_freq);
        let tremolo = self.tremolo.update() * self.tuning.tremolo_volume * lfo_volume;
        let vibrato = self.vibrato.update() * self.tuning.vibrato_size * lfo_volume;

        self.freq.update_movement(self.sample_duration);
        let frequency = self.freq.update_lagged();
        self.wave
            .set_frequency(clamp(frequency + vibrato, MIN_PARTIAL_FREQUENCY, MAX_PARTIAL_FREQUENCY));

        Modulation { volume, tremolo, frequency }
    }

    /// Power LFO output scaled by its follower, 0 for partials without one.
    pub fn power(&mut self) -> f64 {
        let volume = self.power_volume.update_lagged();
        match (self.power_lfo.as_mut(), self.tuning.power_lfo) {
            (Some(lfo), Some(p)) => lfo.update() * volume * p.volume,
            _ => 0.0,
        }
    }

    /// Advance the waveform one tick, through the wave filter when configured.
    pub fn oscillate(&mut self, shape: &PulseShape) -> Sample {
        if let Some(lfos) = self.pulse_lfos.as_mut() {
            let mut lfo = 0.0;
            for (w, osc) in shape.weights.iter().zip(lfos.iter_mut()) {
                lfo += w * osc.update();
            }
            self.wave.set_pulse_width(clamp(self.tuning.pulse_width + shape.depth * lfo, 0.01, 0.99));
        }

        let x = self.wave.update();
        match self.wave_filter.as_mut() {
            Some(filter) => {
                filter.set_target(x, false);
                filter.update_lagged()
            }
            None => x,
        }
    }

    /// Spring lowpass; a larger `spring_acc` means a brighter tone.
    pub fn low_pass(&mut self, x: Sample, spring_acc: f64) -> Sample {
        self.low_pass.set_spring_acc(spring_acc);
        self.low_pass.set_target(x, false);
        self.low_pass.update_lagged()
    }

    #[inline]
    pub fn pan(&self, x: Sample) -> StereoSample {
        StereoSample::new(x * self.left, x * self.right)
    }
}

/// A single delay tap: `(delay seconds, volume, feedback volume, averaged samples)`.
pub type TapSpec = (Time, Volume, Volume, usize);

/// Two mono delays fed crosswise: each side echoes the other side plus the other's echo,
/// so repeats bounce between the channels.
#[derive(Clone, Debug)]
pub struct CrossDelay {
    left: Delays,
    right: Delays,
}

impl CrossDelay {
    pub const BUFFER_LEN: Time = 1.0;

    pub fn new(left: TapSpec, right: TapSpec, sample_rate: Frequency) -> Self {
        let tap = |(delay, volume, feedback, average): TapSpec| {
            let mut d = Delays::new(1, Self::BUFFER_LEN, sample_rate);
            d.add_delay(delay, volume, feedback, average);
            d
        };
        Self { left: tap(left), right: tap(right) }
    }

    /// Dry plus the bounced echoes.
    pub fn process(&mut self, dry: StereoSample) -> StereoSample {
        let left = self.left.update(dry.right + self.right.current_output());
        let right = self.right.update(dry.left + self.left.current_output());
        dry + StereoSample::new(left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{drone_partials, keys_partials};
    use more_asserts::{assert_gt, assert_le, assert_lt};

    const KEYS_PULSE: PulseShape = PulseShape { weights: [0.8, 0.16, 0.04], depth: 0.1 };

    #[test]
    fn frequency_follower_glides_to_target() {
        let mut p = Partial::new(keys_partials()[0].clone(), DEFAULT_SAMPLE_RATE);
        p.freq.set_target(440.0, false);
        let first = p.modulate().frequency;
        assert_lt!(first, 440.0);
        assert_gt!(first, 0.0);
        for _ in 0..200 {
            p.modulate();
        }
        assert!((p.modulate().frequency - 440.0).abs() < 1e-6);
    }

    #[test]
    fn pulse_width_stays_in_bounds() {
        let mut p = Partial::new(keys_partials()[2].clone(), DEFAULT_SAMPLE_RATE);
        p.freq.set_target(220.0, true);
        for _ in 0..20_000 {
            p.modulate();
            p.oscillate(&KEYS_PULSE);
            assert_le!(p.wave.pulse_width(), 0.99);
            assert_gt!(p.wave.pulse_width(), 0.01);
        }
    }

    #[test]
    fn power_is_zero_until_its_follower_opens() {
        let mut p = Partial::new(drone_partials()[1].clone(), DEFAULT_SAMPLE_RATE);
        assert_eq!(p.power(), 0.0);
        p.power_volume.set_target(1.0, true);
        // 90° start phase: the first tick is near the crest
        assert_gt!(p.power(), 0.9);
    }

    #[test]
    fn mute_and_unmute_restore_the_pan() {
        let mut p = Partial::new(keys_partials()[1].clone(), DEFAULT_SAMPLE_RATE);
        p.mute();
        assert!(p.is_silent());
        assert_eq!(p.pan(1.0), StereoSample::default());
        p.unmute();
        assert_eq!(p.pan(1.0), StereoSample::new(0.9, 0.6));
    }

    #[test]
    fn cross_delay_bounces_between_channels() {
        const SR: f64 = 1000.0;
        let mut d = CrossDelay::new((0.1, 0.5, 0.0, 1), (0.05, 0.5, 0.0, 1), SR);
        let mut out = vec![d.process(StereoSample::new(1.0, 0.0))];
        for _ in 0..300 {
            out.push(d.process(StereoSample::default()));
        }
        assert_eq!(out[0].left, 1.0);
        // the left impulse comes back on the right after the right tap's delay
        let first_right = out.iter().skip(1).position(|s| s.right.abs() > 1e-9).map(|i| i + 1);
        let first_left = out.iter().skip(1).position(|s| s.left.abs() > 1e-9).map(|i| i + 1);
        assert!(first_right.is_some());
        assert_lt!(first_right, first_left.or(Some(usize::MAX)));
    }

    #[test]
    fn low_pass_smooths_a_step() {
        let mut p = Partial::new(keys_partials()[3].clone(), DEFAULT_SAMPLE_RATE);
        let y = p.low_pass(1.0, 0.01);
        assert_lt!(y, 0.1);
    }
}
