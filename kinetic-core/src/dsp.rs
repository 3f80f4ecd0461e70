//! Generic DSP utilities and math helpers.
//!
//! Design goals:
//! - Math backend selection that works with `std` or `libm`
//! - Optional `fast-math` approximations for hot paths
//! - Clean, side-effect free helpers that are easy to test
//!
//! Features used by this file:
//! - `libm`      : route sin/cos/atan2 through `libm`
//! - `fast-math` : enables a polynomial sine for oscillators (faster, approx.)
//!
//! Conventions:
//! - All functions are `#[inline]` where useful to help the optimizer.
//! - Angles are radians unless the name says `deg`.

#![allow(clippy::excessive_precision)]

use core::f64::consts::PI;

use cfg_if::cfg_if;

use crate::sound::{Frequency, Sample};

// ----------------------------- Math backend selection -----------------------------

cfg_if! {
    if #[cfg(feature = "libm")] {
        #[inline] pub(crate) fn m_sin(x: f64) -> f64 { libm::sin(x) }
        #[inline] pub(crate) fn m_cos(x: f64) -> f64 { libm::cos(x) }
        #[inline] pub(crate) fn m_atan2(y: f64, x: f64) -> f64 { libm::atan2(y, x) }
    } else {
        #[inline] pub(crate) fn m_sin(x: f64) -> f64 { x.sin() }
        #[inline] pub(crate) fn m_cos(x: f64) -> f64 { x.cos() }
        #[inline] pub(crate) fn m_atan2(y: f64, x: f64) -> f64 { y.atan2(x) }
    }
}

// --------------------------------- Constants -------------------------------------

/// 2π (commonly useful)
pub const TAU: f64 = 2.0 * PI;

/// 1 / 2π
pub const DIV_TAU: f64 = 1.0 / TAU;

/// 1 / π
pub const DIV_PI: f64 = 1.0 / PI;

/// Frequency ratio between two adjacent semitones.
pub const SEMITONE_RATIO: f64 = 1.059463094359295;

/// Lowest frequency a partial is allowed to sound at.
pub const MIN_PLAYABLE_FREQUENCY: Frequency = 20.0;

// --------------------------------- Utilities -------------------------------------

#[inline]
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo { lo } else if x > hi { hi } else { x }
}

#[inline]
pub fn clamp01(x: f64) -> f64 {
    clamp(x, 0.0, 1.0)
}

#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Map `x` from `[in_a, in_b]` onto `[out_a, out_b]`, clamped to the output range.
#[inline]
pub fn interpolate(in_a: f64, in_b: f64, out_a: f64, out_b: f64, x: f64) -> f64 {
    if in_a == in_b {
        return out_a;
    }
    let t = clamp01((x - in_a) / (in_b - in_a));
    lerp(out_a, out_b, t)
}

#[inline]
pub fn deg_to_rad(deg: f64) -> f64 {
    deg * (PI / 180.0)
}

#[inline]
pub fn rad_to_deg(rad: f64) -> f64 {
    rad * (180.0 / PI)
}

/// Polar angle of `(x, y)` in degrees, in (-180, 180].
#[inline]
pub fn point_to_deg(x: f64, y: f64) -> f64 {
    rad_to_deg(m_atan2(y, x))
}

/// Round `n` up to the next even number.
#[inline]
pub fn round_up_even(n: usize) -> usize {
    n + (n % 2)
}

/// `2π·f`: angular speed of a frequency in radians per second.
#[inline]
pub fn frequency_to_phase_speed(freq: Frequency) -> f64 {
    TAU * freq
}

/// A partial at `freq` can sound: at least 20 Hz and no higher than Nyquist.
#[inline]
pub fn is_frequency_playable(freq: Frequency, sample_rate: Frequency) -> bool {
    freq >= MIN_PLAYABLE_FREQUENCY && freq <= sample_rate / 2.0
}

/// Convert signed 16-bit PCM into `[-1, 1]` samples.
pub fn convert_i16_to_samples(pcm: &[i16]) -> Vec<Sample> {
    pcm.iter().map(|&s| Sample::from(s) / 32767.0).collect()
}

// --------------------------------- Fast trig -------------------------------------

/// Sine for oscillators. With `fast-math` a range-reduced 7th-order odd polynomial,
/// max abs error ~2e-4 over a cycle; exact otherwise.
#[inline]
pub fn fast_sin(x: f64) -> f64 {
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            let k = (x * DIV_TAU).round();
            let mut xr = x - k * TAU;
            // fold into [-π/2, π/2] where the series is tight
            if xr > PI * 0.5 {
                xr = PI - xr;
            } else if xr < -PI * 0.5 {
                xr = -PI - xr;
            }
            let x2 = xr * xr;
            xr * (1.0 + x2 * (-1.0 / 6.0 + x2 * (1.0 / 120.0 - x2 / 5040.0)))
        } else {
            m_sin(x)
        }
    }
}

#[inline]
pub fn fast_cos(x: f64) -> f64 {
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            // cos(x) = sin(x + π/2)
            fast_sin(x + PI * 0.5)
        } else {
            m_cos(x)
        }
    }
}

// --------------------------------- Tests (std only) ------------------------------
