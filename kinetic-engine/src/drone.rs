//! Four detuned partials around 50 Hz, shaped continuously by tilt. There are no notes.
//!
//! - around Y (tilt back past 10°): fades the drone in, full at 50°
//! - around X (forward past 10°): slow power-LFO swell, full at 45°
//! - around X (back past 10°): stepped clip distortion, full at −25°
//! - heading drift since focus darkens the lowpass

use kinetic_core::prelude::*;
use log::warn;

use crate::instrument::{ControlInput, Instrument};
use crate::kinetic::{KineticState, INSTRUMENT_FADE_OUT_DURATION};
use crate::partial::{CrossDelay, Partial, PulseShape};
use crate::tuning::{drone_partials, PartialTuning};

pub const DRONE_PARTIALS_NUM: usize = 4;
pub const DRONE_FUNDAMENTAL: Frequency = 50.0;
const PARTIALS_VOLUME: Volume = 3.0 / DRONE_PARTIALS_NUM as f64;
const POWER_VOLUME: Volume = 1.0;

const ZERO_ROT_AROUND_X: f64 = 10.0;
const POWER_LFO_MAX_AROUND_X: f64 = 45.0;
const CLIP_MAX_AROUND_X: f64 = -25.0;
const SUSTAIN_MIN_AROUND_Y: f64 = -10.0;
const SUSTAIN_MAX_AROUND_Y: f64 = -50.0;

const CLIP_STEP: Sample = 0.5;
const STEPPER_SPRING: (f64, f64) = (0.0001, 0.99);
const PULSE: PulseShape = PulseShape { weights: [0.70, 0.25, 0.05], depth: 0.04 };

const MAX_FILTERED_OUTPUT: Sample = 5.0;
const MAX_PARTIAL_OUTPUT: Sample = 10.0;

/// Fold `x` toward the 0.5 grid. On odd steps it snaps to the step edge, on even steps the
/// remainder is boosted; `amount` blends between dry (0) and fully clipped (1).
pub fn stepped_clip(x: Sample, amount: f64) -> Sample {
    let stepped = (x.abs() / CLIP_STEP).floor();
    let progress = x % CLIP_STEP;
    if stepped as i64 % 2 == 1 {
        let edge = (if x > 0.0 { stepped + 1.0 } else { -stepped - 1.0 }) * CLIP_STEP;
        x + (edge - x) * amount
    } else {
        x + progress * 2.5 * amount
    }
}

#[derive(Clone, Debug)]
pub struct DroneInstrument {
    sample_rate: Frequency,
    kinetic: KineticState,
    partials: Vec<Partial>,
    geo_base: Option<f64>,
    geo_diff: Stepper,
    clip: Stepper,
    delay: CrossDelay,
}

impl DroneInstrument {
    pub fn new(sample_rate: Frequency) -> Self {
        Self::with_tuning(drone_partials(), sample_rate)
    }

    pub fn with_tuning(tuning: Vec<PartialTuning>, sample_rate: Frequency) -> Self {
        assert_eq!(tuning.len(), DRONE_PARTIALS_NUM, "drone needs {DRONE_PARTIALS_NUM} partials");
        let partials = tuning
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                let mut p = Partial::new(t, sample_rate);
                let freq = p.multiplier() * DRONE_FUNDAMENTAL;
                if is_frequency_playable(freq, sample_rate) {
                    p.freq.set_target(freq, true);
                } else {
                    warn!("drone: partial {i} at {freq:.1} Hz is unplayable, muting");
                    p.mute();
                }
                p
            })
            .collect();
        Self {
            sample_rate,
            kinetic: KineticState::new(),
            partials,
            geo_base: None,
            geo_diff: Stepper::new(0.0).with_spring(STEPPER_SPRING.0, STEPPER_SPRING.1),
            clip: Stepper::new(0.0).with_spring(STEPPER_SPRING.0, STEPPER_SPRING.1),
            delay: CrossDelay::new((0.63487, 0.23, 0.0, 8), (0.41238, 0.28, 0.0, 4), sample_rate),
        }
    }

    #[inline] pub fn sample_rate(&self) -> Frequency { self.sample_rate }
    #[inline] pub fn clip_amount(&self) -> f64 { self.clip.lagged_pos() }
    #[inline] pub fn volume_target(&self) -> Volume { self.partials[0].volume.target() }
}

impl Instrument for DroneInstrument {
    fn name(&self) -> &str {
        "drone"
    }

    fn update_input(&mut self, input: &ControlInput) {
        self.kinetic.update_input(input);

        let x = input.around_x;
        let power = clamp01((x - ZERO_ROT_AROUND_X) / (POWER_LFO_MAX_AROUND_X - ZERO_ROT_AROUND_X)).powi(2);
        let clip = clamp01((x - ZERO_ROT_AROUND_X) / (CLIP_MAX_AROUND_X - ZERO_ROT_AROUND_X)).powi(3);
        let sustain = clamp01((input.around_y - SUSTAIN_MIN_AROUND_Y) / (SUSTAIN_MAX_AROUND_Y - SUSTAIN_MIN_AROUND_Y)).powi(2);

        for p in self.partials.iter_mut().filter(|p| !p.is_silent()) {
            p.volume.set_target(sustain * PARTIALS_VOLUME, false);
            p.freq.set_target(p.multiplier() * DRONE_FUNDAMENTAL, false);
            p.power_volume.set_target(power, false);
        }
        self.clip.set_target(clip, false);

        let base = *self.geo_base.get_or_insert(input.geo_angle);
        self.geo_diff.set_target(input.geo_angle - base, false);
    }

    fn on_gain_focus(&mut self) {
        self.kinetic.gain_focus();
        self.geo_base = None;
    }

    fn on_lose_focus(&mut self) {
        self.kinetic.lose_focus();
        for p in self.partials.iter_mut() {
            p.volume.set_movement(0.0, INSTRUMENT_FADE_OUT_DURATION);
        }
    }

    fn generate_sample(&mut self) -> StereoSample {
        let geo_diff = self.geo_diff.update_lagged();
        let clip = self.clip.update_lagged();
        let darken = 0.9_f64.powf(geo_diff * 1.3);

        let mut sum = StereoSample::default();
        for p in self.partials.iter_mut() {
            if p.is_silent() {
                continue;
            }
            let m = p.modulate();
            let power = p.power() * POWER_VOLUME;
            let mut x = p.oscillate(&PULSE);

            let spring_acc = clamp(m.frequency * 0.001 * darken, 0.0003, 0.95);
            x = p.low_pass(x, spring_acc);
            assert!(x.abs() < MAX_FILTERED_OUTPUT, "drone filter output {x} out of range");

            if clip > 0.0 {
                x = stepped_clip(x, clip);
            }
            x *= m.volume * (1.0 + m.tremolo) * (1.0 + power);
            assert!(x.abs() < MAX_PARTIAL_OUTPUT, "drone partial output {x} out of range");
            sum += p.pan(x);
        }
        assert!(sum.max_abs() < MAX_PARTIAL_OUTPUT, "drone partial sum {sum:?} out of range");

        self.delay.process(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use more_asserts::{assert_gt, assert_lt};

    const SR: f64 = DEFAULT_SAMPLE_RATE;

    fn peak(d: &mut DroneInstrument, n: usize) -> Sample {
        (0..n).map(|_| d.generate_sample().max_abs()).fold(0.0, f64::max)
    }

    #[test]
    fn silent_while_held_level() {
        let mut d = DroneInstrument::new(SR);
        d.on_gain_focus();
        d.update_input(&ControlInput::default());
        assert_lt!(peak(&mut d, 20_000), 1e-9);
    }

    #[test]
    fn tilting_back_fades_in() {
        let mut d = DroneInstrument::new(SR);
        d.on_gain_focus();
        d.update_input(&ControlInput { around_y: -50.0, ..Default::default() });
        assert!(approx_eq!(f64, d.volume_target(), 0.75));
        assert_gt!(peak(&mut d, 20_000), 0.05);
    }

    #[test]
    fn half_tilt_is_quarter_volume() {
        let mut d = DroneInstrument::new(SR);
        d.update_input(&ControlInput { around_y: -30.0, ..Default::default() });
        assert!(approx_eq!(f64, d.volume_target(), 0.25 * 0.75));
    }

    #[test]
    fn tilting_around_x_backwards_engages_clip() {
        let mut d = DroneInstrument::new(SR);
        d.update_input(&ControlInput { around_x: -25.0, around_y: -50.0, ..Default::default() });
        peak(&mut d, 5000);
        assert_gt!(d.clip_amount(), 0.0);

        let mut level = DroneInstrument::new(SR);
        level.update_input(&ControlInput { around_x: 45.0, ..Default::default() });
        peak(&mut level, 5000);
        assert_eq!(level.clip_amount(), 0.0);
    }

    #[test]
    fn clip_snaps_odd_steps_and_boosts_even_ones() {
        assert_eq!(stepped_clip(0.7, 0.0), 0.7);
        assert!(approx_eq!(f64, stepped_clip(0.7, 1.0), 1.0));
        assert!(approx_eq!(f64, stepped_clip(-0.7, 1.0), -1.0));
        assert!(approx_eq!(f64, stepped_clip(0.2, 1.0), 0.7));
        assert!(approx_eq!(f64, stepped_clip(-0.2, 0.5), -0.45));
    }

    #[test]
    fn full_tilt_with_clip_stays_in_range() {
        let mut d = DroneInstrument::new(SR);
        d.on_gain_focus();
        d.update_input(&ControlInput { around_x: -60.0, around_y: -90.0, ..Default::default() });
        assert_lt!(peak(&mut d, SR as usize), MAX_PARTIAL_OUTPUT);
    }

    #[test]
    fn losing_focus_fades_out() {
        let mut d = DroneInstrument::new(SR);
        d.on_gain_focus();
        d.update_input(&ControlInput { around_y: -50.0, ..Default::default() });
        peak(&mut d, 20_000);
        d.on_lose_focus();
        peak(&mut d, (4.0 * SR) as usize);
        assert_lt!(peak(&mut d, 1000), 1e-3);
    }
}
