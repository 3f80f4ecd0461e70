//! Stepped volume envelope.
//!
//! Steps run in order `FadeBeforeAttack → AttackJump → Attack → Decay → Sustain → Release`.
//! - every step before `Sustain` has a duration, a target volume and an easing; a step with
//!   zero duration is skipped when it is entered, so an unused stage never costs a sample
//! - `Sustain` holds until the sustain flag drops
//! - `Release` has no duration: each tick moves `progress ← 1 − (1 − progress)·f`, with `f`
//!   interpolated between the start and end fade factors, and snaps to 1 past 0.999
//!
//! The volume of a step is always `lerp(start, end, ease(progress))`, where `start` is the
//! envelope's volume at the moment the step was entered. Restarting mid-note therefore never
//! jumps.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::dsp::lerp;
use crate::followers::Easing;
use crate::sound::{Frequency, Time, Volume};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum EnvelopeStep {
    FadeBeforeAttack,
    AttackJump,
    Attack,
    Decay,
    Sustain,
    Release,
}

impl EnvelopeStep {
    #[inline]
    fn next(self) -> Self {
        match self {
            Self::FadeBeforeAttack => Self::AttackJump,
            Self::AttackJump => Self::Attack,
            Self::Attack => Self::Decay,
            Self::Decay => Self::Sustain,
            Self::Sustain | Self::Release => Self::Release,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Envelope {
    sample_rate: Frequency,

    // configuration
    fade_duration:        Time,
    attack_jump_duration: Time,
    attack_duration:      Time,
    decay_duration:       Time,
    fade_volume:          Volume,
    attack_jump_volume:   Volume,
    attack_volume:        Volume,
    sustain_volume:       Volume,
    release_fade_start:   f64,
    release_fade_end:     f64,
    attack_jump_ease:     Easing,
    attack_ease:          Easing,
    decay_ease:           Easing,

    // state
    current:       Volume,
    step:          EnvelopeStep,
    progress:      f64,
    progress_step: f64,
    step_start:    Volume,
    step_end:      Volume,
    step_ease:     Easing,
    sustained:     bool,
}

impl Envelope {
    pub const DEFAULT_ATTACK_JUMP_DURATION: Time = 0.005;

    /// Finished envelope with the default shape: 0.1 s attack to 1.0, 0.3 s decay to 0.8,
    /// release factor 0.9997.
    pub fn new(sample_rate: Frequency) -> Self {
        let mut e = Self {
            sample_rate,
            fade_duration: 0.0,
            attack_jump_duration: 0.0,
            attack_duration: 0.1,
            decay_duration: 0.3,
            fade_volume: 0.0,
            attack_jump_volume: 0.0,
            attack_volume: 1.0,
            sustain_volume: 0.8,
            release_fade_start: 0.9997,
            release_fade_end: 0.9997,
            attack_jump_ease: Easing::Linear,
            attack_ease: Easing::Linear,
            decay_ease: Easing::Linear,
            current: 0.0,
            step: EnvelopeStep::Release,
            progress: 1.0,
            progress_step: 0.0,
            step_start: 0.0,
            step_end: 0.0,
            step_ease: Easing::Linear,
            sustained: false,
        };
        e.finish();
        e
    }

    // ----- configuration -----

    pub fn set_durations(&mut self, attack_jump: Time, attack: Time, decay: Time, fade_before_start: Time) {
        self.attack_jump_duration = attack_jump;
        self.attack_duration = attack;
        self.decay_duration = decay;
        self.fade_duration = fade_before_start;
    }

    pub fn set_volumes(&mut self, attack_jump: Volume, attack: Volume, sustain: Volume) {
        self.attack_jump_volume = attack_jump;
        self.attack_volume = attack;
        self.sustain_volume = sustain;
    }

    #[inline] pub fn set_sustain_volume(&mut self, v: Volume) { self.sustain_volume = v; }

    #[inline]
    pub fn set_release_fade_factor(&mut self, start: f64, end: f64) {
        self.release_fade_start = start;
        self.release_fade_end = end;
    }

    #[inline]
    pub fn set_attack_jump(&mut self, volume: Volume, duration: Time) {
        self.attack_jump_volume = volume;
        self.attack_jump_duration = duration;
    }

    pub fn set_easings(&mut self, attack_jump: Easing, attack: Easing, decay: Easing) {
        self.attack_jump_ease = attack_jump;
        self.attack_ease = attack;
        self.decay_ease = decay;
    }

    #[inline] pub fn set_sustained(&mut self, sustained: bool) { self.sustained = sustained; }
    #[inline] pub fn stop_sustain_if(&mut self, cond: bool) { self.sustained &= !cond; }

    // ----- triggering -----

    /// Restart from silence.
    pub fn start(&mut self) {
        self.current = 0.0;
        self.set_step(EnvelopeStep::AttackJump);
    }

    /// Restart from whatever is sounding now.
    pub fn start_from_current(&mut self) {
        self.set_step(EnvelopeStep::AttackJump);
    }

    /// Fade the current volume to `volume` first, then attack.
    pub fn fade_current_and_start(&mut self, volume: Volume) {
        self.fade_volume = volume;
        self.set_step(EnvelopeStep::FadeBeforeAttack);
    }

    pub fn release(&mut self) {
        self.set_step(EnvelopeStep::Release);
    }

    /// Silence immediately.
    pub fn finish(&mut self) {
        self.current = 0.0;
        self.set_step(EnvelopeStep::Release);
        self.progress = 1.0;
    }

    // ----- queries -----

    #[inline] pub fn step(&self) -> EnvelopeStep { self.step }
    #[inline] pub fn step_progress(&self) -> f64 { self.progress }
    #[inline] pub fn volume(&self) -> Volume { self.current }
    #[inline] pub fn is_sustained(&self) -> bool { self.sustained }
    #[inline] pub fn is_finished(&self) -> bool { self.step == EnvelopeStep::Release && self.progress >= 1.0 }
    #[inline] pub fn is_playing(&self) -> bool { !self.is_finished() }

    pub fn set_step(&mut self, step: EnvelopeStep) {
        let (duration, end, ease) = match step {
            EnvelopeStep::FadeBeforeAttack => (self.fade_duration, self.fade_volume, Easing::Linear),
            EnvelopeStep::AttackJump => {
                let d = if self.attack_jump_volume > 0.0 { self.attack_jump_duration } else { 0.0 };
                (d, self.attack_jump_volume, self.attack_jump_ease)
            }
            EnvelopeStep::Attack => (self.attack_duration, self.attack_volume, self.attack_ease),
            EnvelopeStep::Decay => (self.decay_duration, self.sustain_volume, self.decay_ease),
            EnvelopeStep::Sustain => (0.0, self.sustain_volume, Easing::Linear),
            EnvelopeStep::Release => (0.0, 0.0, Easing::Linear),
        };

        if step < EnvelopeStep::Sustain && duration == 0.0 {
            self.set_step(step.next());
            return;
        }

        self.step = step;
        self.progress = 0.0;
        self.progress_step = if duration == 0.0 { 0.0 } else { 1.0 / (duration * self.sample_rate) };
        self.step_start = self.current;
        self.step_end = end;
        self.step_ease = ease;
        debug_assert!(!self.step_start.is_nan() && !self.step_end.is_nan());
    }

    /// Advance one sample and return the volume.
    pub fn update(&mut self) -> Volume {
        match self.step {
            EnvelopeStep::FadeBeforeAttack
            | EnvelopeStep::AttackJump
            | EnvelopeStep::Attack
            | EnvelopeStep::Decay => {
                self.progress += self.progress_step;
                if self.progress >= 1.0 {
                    self.set_step(self.step.next());
                }
            }
            EnvelopeStep::Sustain => {
                self.progress = 0.5;
                if !self.sustained {
                    self.set_step(EnvelopeStep::Release);
                }
            }
            EnvelopeStep::Release => {
                if self.progress < 1.0 {
                    let f = lerp(self.release_fade_start, self.release_fade_end, self.progress);
                    self.progress = 1.0 - (1.0 - self.progress) * f;
                    if self.progress >= 0.999 {
                        self.progress = 1.0;
                    }
                }
            }
        }

        debug_assert!((0.0..=1.0).contains(&self.progress), "envelope progress {}", self.progress);
        self.current = lerp(self.step_start, self.step_end, self.step_ease.ease(self.progress));
        self.current
    }
}
