//! A hand swinging the phone, as sensor frames at 100 Hz.
//!
//! Every swing is: rest, a short wind-up, a fast hit down −Z, a rebound and a slow return.
//! The swing height (Y offset) steps through a few levels between swings so beats land on
//! different notes, and the magnetometer drifts slowly so heading and tilt change too.

use std::f64::consts::TAU;

use kinetic_motion::prelude::Vector3D;

pub const FEED_RATE: f64 = 100.0;
pub const FEED_PERIOD: f64 = 1.0 / FEED_RATE;

/// Y offsets cycled through, one per swing.
const HEIGHTS: [f64; 5] = [0.0, -0.1, -0.2, -0.35, -0.5];
const REST_TICKS: usize = 3;
const RETURN_TICKS: usize = 10;
const HOLD_TICKS: usize = 40;

const HEADING_PERIOD: f64 = 12.0;
const HEADING_SWAY: f64 = 0.3;
const TILT_PERIOD: f64 = 7.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorFrame {
    pub t: f64,
    pub acc: Vector3D,
    pub gyro: Vector3D,
    pub mag: Vector3D,
}

/// One swing's Z track, starting and ending at rest.
fn swing_track() -> Vec<f64> {
    let ramp = |from: f64, step: f64, n: usize| (1..=n).map(move |i| from + step * i as f64);
    let mut z = vec![0.0; REST_TICKS];
    z.extend(ramp(0.0, 0.1, 5));
    z.extend(ramp(0.5, -0.3, 5));
    z.extend(ramp(-1.0, 0.3, 5));
    z.extend(ramp(0.5, -0.5 / RETURN_TICKS as f64, RETURN_TICKS));
    z.extend(std::iter::repeat(0.0).take(HOLD_TICKS));
    z
}

#[derive(Clone, Debug)]
pub struct SwingSimulator {
    t: f64,
    track: Vec<f64>,
    tick: usize,
    swing: usize,
}

impl SwingSimulator {
    /// Starts at `t = 3.0`, the engine's clock origin.
    pub fn new() -> Self {
        Self { t: 3.0, track: swing_track(), tick: 0, swing: 0 }
    }

    #[inline] pub fn swings(&self) -> usize { self.swing }

    pub fn next_frame(&mut self) -> SensorFrame {
        self.t += FEED_PERIOD;

        let z = self.track[self.tick];
        let hold_start = self.track.len() - HOLD_TICKS;
        let height = HEIGHTS[self.swing % HEIGHTS.len()];
        let y = if self.tick < hold_start {
            height
        } else {
            // glide to the next swing's height while holding still
            let next = HEIGHTS[(self.swing + 1) % HEIGHTS.len()];
            let p = (self.tick - hold_start + 1) as f64 / HOLD_TICKS as f64;
            height + (next - height) * p
        };

        self.tick += 1;
        if self.tick == self.track.len() {
            self.tick = 0;
            self.swing += 1;
        }

        let mag = Vector3D::new(
            0.0,
            -0.2 - 0.08 * (TAU * self.t / TILT_PERIOD).sin(),
            HEADING_SWAY * (TAU * self.t / HEADING_PERIOD).sin(),
        );
        SensorFrame { t: self.t, acc: Vector3D::new(0.0, y, z), gyro: Vector3D::new(1.0, 0.0, 0.0), mag }
    }
}

impl Default for SwingSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for SwingSimulator {
    type Item = SensorFrame;

    fn next(&mut self) -> Option<SensorFrame> {
        Some(self.next_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_motion::prelude::AccEngine;

    #[test]
    fn frames_tick_at_the_feed_rate() {
        let frames: Vec<SensorFrame> = SwingSimulator::new().take(3).collect();
        assert!((frames[2].t - frames[0].t - 2.0 * FEED_PERIOD).abs() < 1e-12);
        assert!(frames[0].t > 3.0);
    }

    #[test]
    fn track_returns_to_rest() {
        let track = swing_track();
        assert_eq!(track[0], 0.0);
        assert!(track.last().is_some_and(|z| z.abs() < 1e-12));
        assert!(track.iter().any(|&z| z <= -1.0 + 1e-12));
    }

    #[test]
    fn swings_are_detected_as_beats() {
        let mut acc = AccEngine::default();
        let mut sim = SwingSimulator::new();
        let mut beats = 0;
        for _ in 0..(5.0 * FEED_RATE) as usize {
            let f = sim.next_frame();
            beats += usize::from(acc.feed_acc_at(f.t, f.acc, f.gyro, f.mag));
        }
        assert!(sim.swings() >= 5);
        assert!(beats >= 1);
    }
}
