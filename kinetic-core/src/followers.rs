//! Control-rate followers that steer a value toward a target without jumps.
//!
//! - `HalfWayThere`    : one-pole `v += (in - v)·step`
//! - `Inertia`         : mass on a spring with friction (weight/friction knobs)
//! - `SmoothTransition`: eased ramp between two values over a fixed duration
//! - `Stepper`         : lagged target + optional damped spring + linear glides
//!
//! All of them are ticked once per sample (or once per control tick) by the owner.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::dsp::{clamp01, fast_cos, lerp};
use crate::sound::{Frequency, Time};
use core::f64::consts::PI;

// ---------------------------------- Easing ---------------------------------------

/// Shape of a normalized `[0, 1] -> [0, 1]` ramp.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    Ease,
    EaseIn,
    EaseOut,
}

impl Easing {
    #[inline]
    pub fn ease(self, p: f64) -> f64 {
        match self {
            Easing::Linear => p,
            Easing::Ease => (1.0 - fast_cos(PI * p)) * 0.5,
            Easing::EaseIn => 1.0 - fast_cos(PI * 0.5 * p),
            Easing::EaseOut => -fast_cos(PI * 0.5 * (1.0 + p)),
        }
    }
}

// ------------------------------- HalfWayThere ------------------------------------

#[derive(Copy, Clone, Debug)]
pub struct HalfWayThere {
    value: f64,
    step:  f64,
}

impl Default for HalfWayThere {
    fn default() -> Self { Self::new(0.001) }
}

impl HalfWayThere {
    #[inline] pub fn new(step: f64) -> Self { Self { value: 0.0, step } }
    #[inline] pub fn set_step(&mut self, step: f64) { self.step = step; }
    #[inline] pub fn set_value(&mut self, v: f64) { self.value = v; }
    #[inline] pub fn value(&self) -> f64 { self.value }

    #[inline]
    pub fn update(&mut self, input: f64) -> f64 {
        self.value += (input - self.value) * self.step;
        self.value
    }
}

// ---------------------------------- Inertia --------------------------------------

/// Heavier weight accelerates slower; higher friction stops sooner.
#[derive(Copy, Clone, Debug)]
pub struct Inertia {
    current:      f64,
    velocity:     f64,
    weight_factor: f64, // 1e-6 / weight
    damp:         f64,  // 1 - friction·1e-3
}

impl Inertia {
    pub fn new(weight: f64, friction: f64) -> Self {
        let mut s = Self { current: 0.0, velocity: 0.0, weight_factor: 0.0, damp: 1.0 };
        s.set_weight(weight);
        s.set_friction(friction);
        s
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f64) {
        debug_assert!(weight > 0.0, "inertia weight must be positive");
        self.weight_factor = 1e-6 / weight;
    }

    #[inline] pub fn set_friction(&mut self, friction: f64) { self.damp = 1.0 - friction * 0.001; }
    #[inline] pub fn set_value(&mut self, v: f64) { self.current = v; }
    #[inline] pub fn value(&self) -> f64 { self.current }
    #[inline] pub fn velocity(&self) -> f64 { self.velocity }
    #[inline] pub fn stop(&mut self) { self.velocity = 0.0; }

    #[inline]
    pub fn update(&mut self, input: f64) -> f64 {
        self.velocity += (input - self.current) * self.weight_factor;
        self.velocity *= self.damp;
        self.current += self.velocity;
        self.current
    }
}

// ----------------------------- SmoothTransition ----------------------------------

#[derive(Copy, Clone, Debug)]
pub struct SmoothTransition {
    start:         f64,
    end:           f64,
    progress:      f64,
    progress_step: f64,
    easing:        Easing,
    sample_rate:   Frequency,
}

impl SmoothTransition {
    pub fn new(sample_rate: Frequency) -> Self {
        Self { start: 0.0, end: 0.0, progress: 1.0, progress_step: 0.0, easing: Easing::Linear, sample_rate }
    }

    /// Begin a ramp from `start` to `end` lasting `duration` seconds.
    pub fn start(&mut self, start: f64, end: f64, duration: Time, easing: Easing) {
        self.start = start;
        self.end = end;
        self.easing = easing;
        self.progress = 0.0;
        self.progress_step = if duration > 0.0 { 1.0 / (duration * self.sample_rate) } else { 1.0 };
    }

    #[inline] pub fn is_finished(&self) -> bool { self.progress >= 1.0 }
    #[inline] pub fn end_value(&self) -> f64 { self.end }

    pub fn update(&mut self) -> f64 {
        self.progress += self.progress_step;
        if self.progress >= 1.0 {
            self.progress = 1.0;
            return self.end;
        }
        lerp(self.start, self.end, self.easing.ease(self.progress))
    }
}

// ---------------------------------- Stepper --------------------------------------

#[derive(Copy, Clone, Debug)]
struct Movement {
    from:     f64,
    to:       f64,
    duration: Time,
    elapsed:  Time,
}

/// Target follower used for every smoothed partial parameter.
///
/// Each `update_lagged` tick:
/// 1. the lagged value moves `half_step` of the way to the target (`0` = no lag)
/// 2. with a spring (`spring_acc > 0`) the output chases the lagged value as a damped
///    mass, otherwise it equals the lagged value
///
/// `set_movement` glides the target itself linearly, advanced by `update_movement(dt)`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Stepper {
    target:      f64,
    lagged:      f64,
    half_step:   f64,
    pos:         f64,
    vel:         f64,
    spring_acc:  f64,
    spring_damp: f64,
    movement:    Option<Movement>,
}

impl Stepper {
    pub fn new(initial: f64) -> Self {
        Self { target: initial, lagged: initial, pos: initial, ..Default::default() }
    }

    pub fn with_spring(mut self, acc: f64, damp: f64) -> Self {
        self.set_spring(acc, damp);
        self
    }

    pub fn with_half_step(mut self, h: f64) -> Self {
        self.half_step = h;
        self
    }

    #[inline] pub fn set_spring(&mut self, acc: f64, damp: f64) { self.spring_acc = acc; self.spring_damp = damp; }
    #[inline] pub fn set_spring_acc(&mut self, acc: f64) { self.spring_acc = acc; }
    #[inline] pub fn set_half_step(&mut self, h: f64) { self.half_step = clamp01(h); }

    /// Retarget. `immediate` also snaps the lagged value and the spring to `t`.
    pub fn set_target(&mut self, t: f64, immediate: bool) {
        self.movement = None;
        self.target = t;
        if immediate {
            self.lagged = t;
            self.pos = t;
            self.vel = 0.0;
        }
    }

    /// Glide the target from where it is now to `to` over `duration` seconds.
    pub fn set_movement(&mut self, to: f64, duration: Time) {
        if duration <= 0.0 {
            self.set_target(to, false);
            return;
        }
        self.movement = Some(Movement { from: self.target, to, duration, elapsed: 0.0 });
    }

    #[inline] pub fn is_moving(&self) -> bool { self.movement.is_some() }

    pub fn update_movement(&mut self, dt: Time) {
        let Some(m) = self.movement.as_mut() else { return };
        m.elapsed += dt;
        let p = clamp01(m.elapsed / m.duration);
        self.target = lerp(m.from, m.to, p);
        if p >= 1.0 {
            self.movement = None;
        }
    }

    pub fn update_lagged(&mut self) -> f64 {
        if self.half_step > 0.0 {
            self.lagged += (self.target - self.lagged) * self.half_step;
        } else {
            self.lagged = self.target;
        }
        if self.spring_acc > 0.0 {
            self.vel += (self.lagged - self.pos) * self.spring_acc;
            self.vel *= self.spring_damp;
            self.pos += self.vel;
        } else {
            self.pos = self.lagged;
        }
        self.pos
    }

    #[inline] pub fn target(&self) -> f64 { self.target }
    #[inline] pub fn lagged_pos(&self) -> f64 { self.pos }
    #[inline] pub fn velocity(&self) -> f64 { self.vel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use more_asserts::{assert_gt, assert_lt};

    #[test]
    fn easings_hit_endpoints() {
        for e in [Easing::Linear, Easing::Ease, Easing::EaseIn, Easing::EaseOut] {
            assert!(approx_eq!(f64, e.ease(0.0), 0.0, epsilon = 1e-3), "{e}");
            assert!(approx_eq!(f64, e.ease(1.0), 1.0, epsilon = 1e-3), "{e}");
        }
        assert!(approx_eq!(f64, Easing::Ease.ease(0.5), 0.5, epsilon = 1e-3));
        assert_lt!(Easing::EaseIn.ease(0.5), 0.5);
        assert_gt!(Easing::EaseOut.ease(0.5), 0.5);
    }

    #[test]
    fn half_way_there_converges() {
        let mut h = HalfWayThere::new(0.1);
        for _ in 0..200 { h.update(1.0); }
        assert!(approx_eq!(f64, h.value(), 1.0, epsilon = 1e-6));
    }

    #[test]
    fn inertia_overshoots_then_settles() {
        let mut m = Inertia::new(0.001, 5.0);
        let mut peak: f64 = 0.0;
        for _ in 0..20_000 { peak = peak.max(m.update(1.0)); }
        assert_gt!(peak, 1.0);
        assert!(approx_eq!(f64, m.value(), 1.0, epsilon = 1e-2), "v={}", m.value());
        m.stop();
        assert_eq!(m.velocity(), 0.0);
    }

    #[test]
    fn smooth_transition_lasts_its_duration() {
        let sr = 1000.0;
        let mut t = SmoothTransition::new(sr);
        t.start(2.0, 4.0, 0.1, Easing::Ease);
        let mut n = 0;
        while !t.is_finished() {
            let v = t.update();
            assert!((2.0..=4.0).contains(&v));
            n += 1;
        }
        assert!((99..=101).contains(&n), "n={n}");
        assert_eq!(t.update(), 4.0);
    }

    #[test]
    fn stepper_without_lag_or_spring_tracks_target() {
        let mut s = Stepper::new(0.0);
        s.set_target(3.0, false);
        assert_eq!(s.update_lagged(), 3.0);
    }

    #[test]
    fn stepper_half_step_lags() {
        let mut s = Stepper::new(0.0).with_half_step(0.5);
        s.set_target(1.0, false);
        assert_eq!(s.update_lagged(), 0.5);
        assert_eq!(s.update_lagged(), 0.75);
    }

    #[test]
    fn stepper_spring_settles_on_target() {
        let mut s = Stepper::new(0.0).with_spring(0.001, 0.95);
        s.set_target(1.0, false);
        for _ in 0..50_000 { s.update_lagged(); }
        assert!(approx_eq!(f64, s.lagged_pos(), 1.0, epsilon = 1e-4));
        s.set_target(-2.0, true);
        assert_eq!(s.lagged_pos(), -2.0);
        assert_eq!(s.velocity(), 0.0);
    }

    #[test]
    fn stepper_movement_glides_linearly() {
        let mut s = Stepper::new(1.0);
        s.set_movement(0.0, 1.0);
        for _ in 0..5 { s.update_movement(0.1); }
        assert!(approx_eq!(f64, s.target(), 0.5, epsilon = 1e-9));
        for _ in 0..10 { s.update_movement(0.1); }
        assert_eq!(s.target(), 0.0);
        assert!(!s.is_moving());
    }
}
