//! Scalar aliases and the stereo frame type shared by every sound unit.

use core::ops::{Add, AddAssign, Mul, MulAssign, Sub};

use num_traits::Zero;

pub type Sample = f64;
/// 1.0 = full scale.
pub type Volume = f64;
pub type Frequency = f64;
/// Seconds.
pub type Time = f64;

/// Sample rate used when a host does not report one.
pub const DEFAULT_SAMPLE_RATE: Frequency = 44_100.0;

/// One stereo frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline] pub const fn new(left: Sample, right: Sample) -> Self { Self { left, right } }

    /// Same value on both channels.
    #[inline] pub const fn mono(v: Sample) -> Self { Self { left: v, right: v } }

    #[inline] pub fn max_abs(&self) -> Sample { self.left.abs().max(self.right.abs()) }
}

impl Add for StereoSample {
    type Output = Self;
    #[inline]
    fn add(self, o: Self) -> Self { Self::new(self.left + o.left, self.right + o.right) }
}

impl Sub for StereoSample {
    type Output = Self;
    #[inline]
    fn sub(self, o: Self) -> Self { Self::new(self.left - o.left, self.right - o.right) }
}

impl AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, o: Self) {
        self.left += o.left;
        self.right += o.right;
    }
}

impl Mul<Sample> for StereoSample {
    type Output = Self;
    #[inline]
    fn mul(self, k: Sample) -> Self { Self::new(self.left * k, self.right * k) }
}

impl MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, k: Sample) {
        self.left *= k;
        self.right *= k;
    }
}

impl Zero for StereoSample {
    #[inline] fn zero() -> Self { Self::default() }
    #[inline] fn is_zero(&self) -> bool { self.left == 0.0 && self.right == 0.0 }
}
