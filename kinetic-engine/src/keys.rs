//! Additive keyboard: seven partials over a three-octave chromatic keyboard.
//!
//! A beat is a hit on a 1410×500 keyboard image: the heading picks the column, the swing
//! height (`1 − norm_freq`) the row, and the key under that point sets the pitch. Louder
//! beats get a shorter attack and a longer decay.
//!
//! Sustain has two triggers. Tilting around Y past 10° holds the note and fades in a
//! floor under the envelope. Holding the device still during the decay also holds it,
//! until the device moves away from where it was held.
//! While the note sustains, turning away from the heading it was struck at darkens the
//! lowpass.

use kinetic_core::prelude::*;
use kinetic_motion::prelude::Vector3D;
use log::{debug, warn};

use crate::instrument::{ControlInput, Instrument};
use crate::kinetic::{KineticState, INSTRUMENT_FADE_OUT_DURATION};
use crate::layout::{pick, Rect};
use crate::partial::{CrossDelay, Partial, PulseShape};
use crate::tuning::{keys_partials, PartialTuning};

pub const KEYS_PARTIALS_NUM: usize = 7;
const MASTER_ENV_PARTIAL: usize = 0;
const NOTE_PARTIALS_VOLUME: Volume = 3.0 / KEYS_PARTIALS_NUM as f64;

const MIN_ATTACK_DURATION: Time = 0.05;
const MAX_ATTACK_DURATION: Time = 0.055;
const MIN_DECAY_DURATION: Time = 0.1;
const MAX_DECAY_DURATION: Time = 0.15;
const SUSTAIN_VOLUME: Volume = 0.8;
const RELEASE_FADE_FACTOR: f64 = 0.99995;

const BG_GEO_HEMI_RANGE: f64 = 90.0;
const ACC_Y_HEMI_RANGE: f64 = 50.0;
const SUSTAIN_TRIGGER_MIN_ANGLE: f64 = 10.0;
const SUSTAIN_TRIGGER_MAX_VELOCITY: f64 = 0.5;
const SUSTAIN_KEEP_MAX_DPOS: f64 = 0.1;

const GEO_DIFF_SPRING: (f64, f64) = (0.0001, 0.99);
const PULSE: PulseShape = PulseShape { weights: [0.8, 0.16, 0.04], depth: 0.10 };

/// Any partial louder than this is a tuning bug.
const MAX_PARTIAL_OUTPUT: Sample = 10.0;

// keyboard image geometry
pub const BG_WIDTH: f64 = 1410.0;
pub const BG_HEIGHT: f64 = 500.0;
const KEYBOARD_LEFT: f64 = 210.0;
const KEYBOARD_RIGHT: f64 = 208.0;
const WHITE_KEYS_NUM: usize = 22;
const WHITE_HIT_TOP: f64 = 266.0;
const WHITE_HIT_BOTTOM: f64 = 396.0;
const BLACK_HIT_TOP: f64 = 201.0;

pub const KEY_FREQUENCIES: [Frequency; 37] = [
    130.81, 138.59, 146.83, 155.56, 164.81, 174.61, 185.00, 196.00, 207.65, 220.00, 233.08, 246.94,
    261.63, 277.18, 293.66, 311.13, 329.63, 349.23, 369.99, 392.00, 415.30, 440.00, 466.16, 493.88,
    523.25, 554.37, 587.33, 622.25, 659.25, 698.46, 739.99, 783.99, 830.61, 880.00, 932.33, 987.77,
    1046.50,
];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Key {
    pub frequency: Frequency,
    pub is_black: bool,
    pub hit_rect: Rect,
}

/// Horizontal nudge of a black key off the white-key boundary, by chromatic index.
fn black_key_offset(chromatic: usize) -> Option<f64> {
    match chromatic % 12 {
        1 => Some(-5.0),
        3 => Some(5.0),
        6 => Some(-7.0),
        8 => Some(0.0),
        10 => Some(7.0),
        _ => None,
    }
}

/// Hit rects of all keys in image coordinates.
pub fn keyboard_layout() -> Vec<Key> {
    let key_w = (BG_WIDTH - KEYBOARD_LEFT - KEYBOARD_RIGHT) / WHITE_KEYS_NUM as f64;
    let mut x = KEYBOARD_LEFT;
    KEY_FREQUENCIES
        .iter()
        .enumerate()
        .map(|(i, &frequency)| match black_key_offset(i) {
            Some(dx) => Key {
                frequency,
                is_black: true,
                hit_rect: Rect::new(x + dx - key_w * 0.5, BLACK_HIT_TOP, x + dx + key_w * 0.5, WHITE_HIT_TOP),
            },
            None => {
                let rect = Rect::new(x, WHITE_HIT_TOP, x + key_w, WHITE_HIT_BOTTOM);
                x += key_w;
                Key { frequency, is_black: false, hit_rect: rect }
            }
        })
        .collect()
}

#[derive(Clone, Debug)]
struct Voice {
    partial: Partial,
    envelope: Envelope,
}

#[derive(Clone, Debug)]
pub struct KeysInstrument {
    sample_rate: Frequency,
    sample_duration: Time,
    kinetic: KineticState,
    voices: Vec<Voice>,
    keys: Vec<Key>,
    hit_rects: Vec<Rect>,

    pitch: Frequency,
    prev_pitch: Frequency,
    beat_volume: Volume,
    last_hit: Option<usize>,

    sustained: bool,
    sustain_by_y: Volume,
    sustain_position: Vector3D,
    geo_base: f64,
    geo_diff: Stepper,

    delay: CrossDelay,
}

impl KeysInstrument {
    pub fn new(sample_rate: Frequency) -> Self {
        Self::with_tuning(keys_partials(), sample_rate)
    }

    pub fn with_tuning(tuning: Vec<PartialTuning>, sample_rate: Frequency) -> Self {
        assert_eq!(tuning.len(), KEYS_PARTIALS_NUM, "keys need {KEYS_PARTIALS_NUM} partials");
        let voices = tuning
            .into_iter()
            .map(|t| Voice { partial: Partial::new(t, sample_rate), envelope: Envelope::new(sample_rate) })
            .collect();
        let keys = keyboard_layout();
        let hit_rects = keys.iter().map(|k| k.hit_rect).collect();
        Self {
            sample_rate,
            sample_duration: 1.0 / sample_rate,
            kinetic: KineticState::new(),
            voices,
            keys,
            hit_rects,
            pitch: 0.0,
            prev_pitch: 0.0,
            beat_volume: 0.0,
            last_hit: None,
            sustained: false,
            sustain_by_y: 0.0,
            sustain_position: Vector3D::zeros(),
            geo_base: 0.0,
            geo_diff: Stepper::new(0.0).with_spring(GEO_DIFF_SPRING.0, GEO_DIFF_SPRING.1),
            delay: CrossDelay::new((0.434, 0.3, 0.0, 8), (0.29238, 0.3, 0.0, 4), sample_rate),
        }
    }

    #[inline] pub fn keys(&self) -> &[Key] { &self.keys }
    #[inline] pub fn pitch(&self) -> Frequency { self.pitch }
    #[inline] pub fn last_hit_key(&self) -> Option<usize> { self.last_hit }
    #[inline] pub fn is_sustained(&self) -> bool { self.sustained }
    #[inline] pub fn sustain_by_y(&self) -> Volume { self.sustain_by_y }
    #[inline] pub fn envelope_step(&self) -> EnvelopeStep { self.voices[MASTER_ENV_PARTIAL].envelope.step() }
    #[inline] pub fn envelope_volume(&self) -> Volume { self.voices[MASTER_ENV_PARTIAL].envelope.volume() }

    /// Key under the image point, nearest when between keys.
    pub fn key_at(&self, x: f64, y: f64) -> Option<usize> {
        pick(&self.hit_rects, x, y)
    }

    fn set_envelopes_sustained(&mut self, sustained: bool) {
        for v in self.voices.iter_mut() {
            v.envelope.set_sustained(sustained);
        }
    }

    /// Rebase the heading when the master envelope enters sustain.
    fn update_envelope(&mut self) {
        let master = &self.voices[MASTER_ENV_PARTIAL].envelope;
        if master.step() == EnvelopeStep::Sustain && master.step_progress() == 0.0 {
            self.geo_base = self.kinetic.input().geo_angle;
        }
    }
}

impl Instrument for KeysInstrument {
    fn name(&self) -> &str {
        "keys"
    }

    fn add_beat(&mut self, norm_freq: f64, volume: Volume) {
        let volume = ((volume * 0.25).powi(2)).min(1.0);
        let geo = self.kinetic.input().geo_angle;
        let geo_input = 1.0 - clamp01((geo + BG_GEO_HEMI_RANGE) / (2.0 * BG_GEO_HEMI_RANGE));
        let x_axis_input = 1.0 - norm_freq;

        let Some(key) = self.key_at(geo_input * BG_WIDTH, x_axis_input * BG_HEIGHT) else {
            return;
        };
        self.last_hit = Some(key);
        self.prev_pitch = self.pitch;
        self.pitch = self.keys[key].frequency;
        self.beat_volume = volume;
        self.sustained = false;
        self.sustain_position = Vector3D::zeros();
        self.geo_base = geo;
        self.geo_diff.set_target(0.0, false);

        let attack = interpolate(0.0, 1.0, MAX_ATTACK_DURATION, MIN_ATTACK_DURATION, volume);
        let decay = interpolate(0.0, 1.0, MIN_DECAY_DURATION, MAX_DECAY_DURATION, volume);
        let glide = self.prev_pitch != 0.0;
        debug!("keys: key {key} ({} Hz), volume {volume:.3}, attack {attack:.4}s", self.pitch);

        for (i, v) in self.voices.iter_mut().enumerate() {
            let freq = v.partial.multiplier() * self.pitch;
            if !is_frequency_playable(freq, self.sample_rate) {
                warn!("keys: partial {i} at {freq:.1} Hz is unplayable, muting");
                v.partial.mute();
                continue;
            }
            v.partial.unmute();
            v.partial.volume.set_target(volume * NOTE_PARTIALS_VOLUME, false);

            let env = &mut v.envelope;
            env.set_sustained(false);
            env.set_durations(0.0, attack, decay, 0.0);
            env.set_volumes(0.0, 1.0, SUSTAIN_VOLUME);
            env.set_release_fade_factor(RELEASE_FADE_FACTOR, RELEASE_FADE_FACTOR);
            env.start_from_current();

            v.partial.freq.set_target(freq, !glide);
        }
    }

    fn set_volume(&mut self, volume: Volume) {
        self.beat_volume = volume;
    }

    fn set_sustain(&mut self, sustained: bool) {
        self.sustained = sustained;
        self.set_envelopes_sustained(sustained);
    }

    fn update_input(&mut self, input: &ControlInput) {
        self.kinetic.update_input(input);

        let y = input.around_y;
        let dont_sustain = y >= SUSTAIN_TRIGGER_MIN_ANGLE;
        let do_sustain = y <= -SUSTAIN_TRIGGER_MIN_ANGLE;
        self.sustain_by_y = if do_sustain {
            ((-SUSTAIN_TRIGGER_MIN_ANGLE - y) / (ACC_Y_HEMI_RANGE - SUSTAIN_TRIGGER_MIN_ANGLE)).powi(2).min(1.0)
        } else {
            0.0
        };

        let master_step = self.envelope_step();
        let was_sustained = self.sustained;
        if !self.sustained && !dont_sustain && master_step == EnvelopeStep::Decay {
            if do_sustain || input.acc_velocity.norm() <= SUSTAIN_TRIGGER_MAX_VELOCITY {
                self.sustain_position = input.acc_position;
                self.sustained = true;
            }
        } else if self.sustained {
            self.sustained =
                do_sustain || (self.sustain_position - input.acc_position).norm() <= SUSTAIN_KEEP_MAX_DPOS;
        }
        if self.sustained != was_sustained {
            debug!("keys: sustain {}", if self.sustained { "on" } else { "off" });
            self.set_envelopes_sustained(self.sustained);
        }

        let volume = (self.beat_volume + self.sustain_by_y) * NOTE_PARTIALS_VOLUME;
        for v in self.voices.iter_mut() {
            v.partial.volume.set_target(volume, false);
        }

        if master_step >= EnvelopeStep::Sustain {
            self.geo_diff.set_target(input.geo_angle - self.geo_base, false);
        }
    }

    fn on_gain_focus(&mut self) {
        self.kinetic.gain_focus();
        self.pitch = 0.0;
        self.prev_pitch = 0.0;
        self.geo_diff.set_target(0.0, true);
        self.last_hit = None;
    }

    fn on_lose_focus(&mut self) {
        self.kinetic.lose_focus();
        self.geo_diff.set_movement(0.0, INSTRUMENT_FADE_OUT_DURATION);
        for v in self.voices.iter_mut() {
            v.partial.volume.set_movement(0.0, INSTRUMENT_FADE_OUT_DURATION);
        }
    }

    fn generate_sample(&mut self) -> StereoSample {
        if self.pitch == 0.0 {
            return StereoSample::default();
        }

        self.update_envelope();
        self.geo_diff.update_movement(self.sample_duration);
        let geo_diff = self.geo_diff.update_lagged();
        let sustain_by_y = self.sustain_by_y;
        let darken = 0.9_f64.powf(geo_diff * 2.0);

        let mut sum = StereoSample::default();
        for v in self.voices.iter_mut() {
            if v.partial.is_silent() {
                continue;
            }
            let m = v.partial.modulate();
            let mut x = v.partial.oscillate(&PULSE);
            x *= m.volume * (1.0 + m.tremolo);
            x *= v.envelope.update().max(sustain_by_y);
            assert!(x.abs() < MAX_PARTIAL_OUTPUT, "keys partial output {x} out of range");

            let spring_acc = clamp(m.frequency * 0.0009 * darken, 0.001, 0.95);
            x = v.partial.low_pass(x, spring_acc);
            sum += v.partial.pan(x);
        }
        assert!(sum.max_abs() < MAX_PARTIAL_OUTPUT, "keys partial sum {sum:?} out of range");

        self.delay.process(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::{assert_gt, assert_lt};

    const SR: f64 = DEFAULT_SAMPLE_RATE;

    fn run(keys: &mut KeysInstrument, n: usize) -> Sample {
        let mut peak: Sample = 0.0;
        for _ in 0..n {
            peak = peak.max(keys.generate_sample().max_abs());
        }
        peak
    }

    #[test]
    fn layout_has_three_octaves() {
        let keys = keyboard_layout();
        assert_eq!(keys.len(), 37);
        assert_eq!(keys.iter().filter(|k| !k.is_black).count(), WHITE_KEYS_NUM);
        assert_eq!(keys[0].hit_rect.min_x, KEYBOARD_LEFT);
        let last = keys[36].hit_rect;
        assert!((last.max_x - (BG_WIDTH - KEYBOARD_RIGHT)).abs() < 1e-9);
        // C#3 sits left of the C/D boundary
        let boundary = keys[2].hit_rect.min_x;
        assert_lt!(keys[1].hit_rect.center().0, boundary);
    }

    #[test]
    fn silent_before_the_first_beat() {
        let mut k = KeysInstrument::new(SR);
        k.on_gain_focus();
        assert_eq!(run(&mut k, 1000), 0.0);
    }

    #[test]
    fn beat_picks_the_key_under_the_swing() {
        let mut k = KeysInstrument::new(SR);
        k.on_gain_focus();
        k.update_input(&ControlInput::default());
        k.add_beat(0.3, 4.0);
        // heading 0 lands mid-keyboard, 0.3 lands in the white row: F4
        assert_eq!(k.last_hit_key(), Some(17));
        assert_eq!(k.pitch(), 349.23);
        assert_gt!(run(&mut k, 4000), 0.01);
    }

    #[test]
    fn high_swing_reaches_the_black_keys() {
        let mut k = KeysInstrument::new(SR);
        k.add_beat(0.9, 2.0);
        let key = k.last_hit_key().expect("a key");
        assert!(k.keys()[key].is_black);
    }

    #[test]
    fn holding_still_during_decay_sustains() {
        let mut k = KeysInstrument::new(SR);
        k.on_gain_focus();
        k.add_beat(0.3, 4.0);
        run(&mut k, 3000);
        assert_eq!(k.envelope_step(), EnvelopeStep::Decay);

        let still = ControlInput { acc_position: Vector3D::new(0.0, 0.0, -1.0), ..Default::default() };
        k.update_input(&still);
        assert!(k.is_sustained());

        let moved = ControlInput { acc_position: Vector3D::new(0.0, 0.5, -1.0), ..Default::default() };
        k.update_input(&moved);
        assert!(!k.is_sustained());
    }

    #[test]
    fn tilting_forward_blocks_sustain() {
        let mut k = KeysInstrument::new(SR);
        k.add_beat(0.3, 4.0);
        run(&mut k, 3000);
        k.update_input(&ControlInput { around_y: 30.0, ..Default::default() });
        assert!(!k.is_sustained());

        let tilted = ControlInput { around_y: -50.0, acc_velocity: Vector3D::new(0.0, 9.0, 0.0), ..Default::default() };
        k.update_input(&tilted);
        assert!(k.is_sustained());
        assert_eq!(k.sustain_by_y(), 1.0);
    }

    #[test]
    fn hardest_beat_stays_in_range() {
        let mut k = KeysInstrument::new(SR);
        k.on_gain_focus();
        k.add_beat(0.5, 4.0);
        assert_lt!(run(&mut k, SR as usize), MAX_PARTIAL_OUTPUT);
    }

    #[test]
    fn losing_focus_fades_out() {
        let mut k = KeysInstrument::new(SR);
        k.on_gain_focus();
        k.add_beat(0.3, 4.0);
        run(&mut k, 2000);
        k.on_lose_focus();
        run(&mut k, (3.0 * SR) as usize);
        assert_lt!(run(&mut k, 1000), 1e-3);
    }

    #[test]
    fn louder_beats_attack_faster() {
        let mut soft = KeysInstrument::new(SR);
        let mut loud = KeysInstrument::new(SR);
        soft.add_beat(0.3, 1.0);
        loud.add_beat(0.3, 4.0);
        // attack 0.0549s vs 0.05s: the loud one reaches decay first
        let ticks_to_decay = |k: &mut KeysInstrument| {
            (0..5000)
                .take_while(|_| {
                    k.generate_sample();
                    k.envelope_step() != EnvelopeStep::Decay
                })
                .count()
        };
        let loud_ticks = ticks_to_decay(&mut loud);
        let soft_ticks = ticks_to_decay(&mut soft);
        assert_lt!(loud_ticks, soft_ticks);
    }
}
