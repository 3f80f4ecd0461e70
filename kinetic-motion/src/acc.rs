//! Beat classification over the accelerometer trajectory.
//!
//! [`AccEngine`] feeds three trajectories in lockstep (acc, gyro, mag). Whenever the
//! acc trajectory closes a segment, the closed segment is classified as a beat or not
//! and every registered listener is called with the answer, synchronously, before the
//! feed returns.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kinetic_core::buffers::BackPos;
use kinetic_core::dsp::{clamp01, interpolate, point_to_deg};
use kinetic_core::sound::Time;

use crate::trajectory::{angle_deg, z_axis, Point, Segment, SegmentDetectionType, Trajectory, Vector3D};

/// Angle window mapped onto a [0, 1] beat frequency.
pub const BEATS_SCALE_START_ANGLE: f64 = -20.0;
pub const BEATS_SCALE_END_ANGLE: f64 = 120.0;
pub const MAX_BEAT_AMPLITUDE: f64 = 4.0;

/// Wall-clock feeds start here so the pre-fed samples at 1, 2, 3 s stay in the past.
const CLOCK_OFFSET: Time = 3.0;

/// Positions averaged for the anticipated beat frequency.
const NEXT_BEAT_WINDOW: BackPos = 20;

// ------------------------------------ Config -------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("beat config I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("beat config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid beat config: {0}")]
    Invalid(String),
}

/// Thresholds of the beat classifier. Amplitudes are in g, velocities in g/s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub min_amplitude:               f64,
    /// Velocity floor at `min_amplitude`.
    pub min_small_beat_avg_velocity: f64,
    /// Velocity floor at `max_beat_amplitude`.
    pub min_big_beat_avg_velocity:   f64,
    /// After an anti-beat, the floor is at least this share of its velocity.
    pub anti_beat_velocity_ratio:    f64,
    /// A previous segment smaller than this share of the current one vetoes the beat.
    pub wind_up_ratio:               f64,
    /// Max angle between the segment and -Z.
    pub max_angle_to_z_deg:          f64,
    /// Max |gyro y| / |gyro x| over the segment.
    pub max_gyro_strength:           f64,
    pub max_beat_amplitude:          f64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            min_amplitude: 0.3,
            min_small_beat_avg_velocity: 4.0,
            min_big_beat_avg_velocity: 25.0,
            anti_beat_velocity_ratio: 0.75,
            wind_up_ratio: 0.1,
            max_angle_to_z_deg: 60.0,
            max_gyro_strength: 1.0,
            max_beat_amplitude: MAX_BEAT_AMPLITUDE,
        }
    }
}

impl BeatConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_amplitude > 0.0 && self.min_amplitude < self.max_beat_amplitude) {
            return Err(ConfigError::Invalid(format!(
                "min_amplitude {} must be in (0, max_beat_amplitude {})",
                self.min_amplitude, self.max_beat_amplitude
            )));
        }
        if self.min_small_beat_avg_velocity < 0.0 || self.min_big_beat_avg_velocity < 0.0 {
            return Err(ConfigError::Invalid("velocity floors must be non-negative".into()));
        }
        if !(0.0..=180.0).contains(&self.max_angle_to_z_deg) {
            return Err(ConfigError::Invalid(format!("max_angle_to_z_deg {} is not an angle", self.max_angle_to_z_deg)));
        }
        Ok(())
    }

    /// Minimum average velocity for a segment of amplitude `amp`.
    #[inline]
    pub fn velocity_floor(&self, amp: f64) -> f64 {
        interpolate(
            self.min_amplitude,
            self.max_beat_amplitude,
            self.min_small_beat_avg_velocity,
            self.min_big_beat_avg_velocity,
            amp,
        )
    }
}

// ----------------------------------- Listeners -----------------------------------

/// Handle returned by [`AccEngine::add_acc_feed_listener`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type AccFeedListener = Box<dyn FnMut(bool) + Send>;

// ----------------------------------- AccEngine -----------------------------------

pub struct AccEngine {
    config: BeatConfig,

    acc:  Trajectory,
    gyro: Trajectory,
    mag:  Trajectory,

    listeners:        Vec<(ListenerId, AccFeedListener)>,
    next_listener_id: u64,

    clock:                  Instant,
    current_feed_timestamp: Time,

    prev_seg_amplitude:      f64,
    prev_seg_amplitude2:     f64,
    prev_seg_avg_velocity:   f64,
    prev_seg_avg_velocity2:  f64,
    prev_seg_end_timestamp:  Time,
    prev_seg_is_anti_beat:   bool,
    prev_segment:            Option<Segment>,

    prev_beat_timestamp: Option<Time>,
    prev_beat_amplitude: f64,
    prev_beat_segment:   Option<Segment>,
}

impl fmt::Debug for AccEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccEngine")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("current_feed_timestamp", &self.current_feed_timestamp)
            .field("prev_beat_timestamp", &self.prev_beat_timestamp)
            .finish_non_exhaustive()
    }
}

impl Default for AccEngine {
    fn default() -> Self {
        Self::new(BeatConfig::default())
    }
}

impl AccEngine {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            config,
            acc: Trajectory::new(SegmentDetectionType::MovingAgainstSegmentInZ),
            gyro: Trajectory::new(SegmentDetectionType::None),
            mag: Trajectory::new(SegmentDetectionType::None),
            listeners: Vec::new(),
            next_listener_id: 0,
            clock: Instant::now(),
            current_feed_timestamp: CLOCK_OFFSET,
            prev_seg_amplitude: 0.0,
            prev_seg_amplitude2: 0.0,
            prev_seg_avg_velocity: 0.0,
            prev_seg_avg_velocity2: 0.0,
            prev_seg_end_timestamp: 0.0,
            prev_seg_is_anti_beat: false,
            prev_segment: None,
            prev_beat_timestamp: None,
            prev_beat_amplitude: 0.0,
            prev_beat_segment: None,
        }
    }

    #[inline] pub fn config(&self) -> &BeatConfig { &self.config }
    #[inline] pub fn set_config(&mut self, config: BeatConfig) { self.config = config; }

    /// Clear the trajectories and the previous-segment state. Listeners stay registered.
    pub fn reset_input(&mut self) {
        self.acc.reset();
        self.gyro.reset();
        self.mag.reset();
        self.clock = Instant::now();
        self.current_feed_timestamp = CLOCK_OFFSET;
        self.prev_seg_amplitude = 0.0;
        self.prev_seg_amplitude2 = 0.0;
        self.prev_seg_avg_velocity = 0.0;
        self.prev_seg_avg_velocity2 = 0.0;
        self.prev_seg_end_timestamp = 0.0;
        self.prev_seg_is_anti_beat = false;
        self.prev_segment = None;
        self.prev_beat_timestamp = None;
        self.prev_beat_amplitude = 0.0;
        self.prev_beat_segment = None;
    }

    // ----- listeners -----

    pub fn add_acc_feed_listener(&mut self, listener: impl FnMut(bool) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns whether a listener with this id was registered.
    pub fn remove_acc_feed_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    // ----- feeding -----

    /// Feed one sensor sample stamped with the engine's wall clock.
    pub fn feed_acc(&mut self, acc: Vector3D, gyro: Vector3D, mag: Vector3D) -> bool {
        let mut t = CLOCK_OFFSET + self.clock.elapsed().as_secs_f64();
        // a clock that did not advance is nudged by the trajectory's dt guard
        if t < self.current_feed_timestamp {
            t = self.current_feed_timestamp;
        }
        self.feed_acc_at(t, acc, gyro, mag)
    }

    /// Feed one sensor sample at time `t` (seconds, after 3.0). Returns whether a beat fired.
    pub fn feed_acc_at(&mut self, t: Time, acc: Vector3D, gyro: Vector3D, mag: Vector3D) -> bool {
        self.current_feed_timestamp = t;

        self.acc.feed_new_position(acc, t);
        self.gyro.feed_new_position(gyro, t);
        self.mag.feed_new_position(mag, t);
        self.acc.update();
        self.gyro.update();
        self.mag.update();

        let mut beat = false;
        if self.acc.just_ended() {
            let seg = self.acc.segments().get(1).clone();
            beat = self.classify(&seg);

            if beat {
                self.prev_beat_amplitude = seg.dpos().norm();
                self.prev_beat_timestamp = Some(t);
                debug!(
                    "beat: amp={:.3}, avg_vel={:.2}, dur={:.3}s",
                    self.prev_beat_amplitude,
                    seg.avg_velocity_size(),
                    seg.duration()
                );
                self.prev_beat_segment = Some(seg.clone());
            }

            self.prev_seg_amplitude2 = self.prev_seg_amplitude;
            self.prev_seg_avg_velocity2 = self.prev_seg_avg_velocity;
            self.prev_seg_amplitude = seg.dpos().norm();
            self.prev_seg_avg_velocity = seg.avg_velocity_size();
            self.prev_seg_end_timestamp = t;
            self.prev_seg_is_anti_beat = seg.dpos().z > 0.0;
            self.prev_segment = Some(seg);
        }

        for (_, listener) in self.listeners.iter_mut() {
            listener(beat);
        }
        beat
    }

    // ----- classification -----

    /// Classify the acc segment at `back_pos` in the segment ring (0 = the open one).
    pub fn is_segment_a_beat(&self, back_pos: BackPos) -> bool {
        let segments = self.acc.segments();
        if !segments.is_back_pos_occupied(back_pos) {
            return false;
        }
        self.classify(segments.get(back_pos))
    }

    /// Whether the segment in progress would be a beat if it ended now.
    pub fn is_expecting_beat(&self) -> bool {
        self.is_segment_a_beat(0)
    }

    fn classify(&self, segment: &Segment) -> bool {
        // an open segment is measured up to the newest sample
        let closed;
        let seg = if segment.is_finished() {
            segment
        } else {
            let mut s = segment.clone();
            s.end_point = Some(Point::new(
                self.acc.positions().get(0),
                *self.acc.timestamps().get(0),
                self.acc.timestamps().timestamp(),
            ));
            self.acc.calc_segment_params(&mut s);
            closed = s;
            &closed
        };

        let cfg = &self.config;
        let dpos = seg.dpos();
        let amp = dpos.norm();
        let avg_vel = seg.avg_velocity_size();
        let angle_to_z = angle_deg(&dpos, &z_axis());
        let gyro_strength = self.gyro_strength(seg);

        let mut floor = cfg.velocity_floor(amp);
        if self.prev_seg_is_anti_beat {
            floor = floor.max(self.prev_seg_avg_velocity * cfg.anti_beat_velocity_ratio);
        }
        let min_amp = if self.prev_seg_amplitude < amp * cfg.wind_up_ratio { 1000.0 } else { cfg.min_amplitude };

        let beat = amp >= min_amp
            && avg_vel >= floor
            && angle_to_z > 180.0 - cfg.max_angle_to_z_deg
            && gyro_strength < cfg.max_gyro_strength;

        if segment.is_finished() {
            debug!(
                "classify: beat={beat}, amp={amp:.3}/{min_amp}, avg_vel={avg_vel:.2}/{floor:.2}, a_to_z={angle_to_z:.1}, gyro={gyro_strength:.2}"
            );
        }
        beat
    }

    /// |gyro y| / |gyro x| summed over the segment's time window.
    fn gyro_strength(&self, seg: &Segment) -> f64 {
        let positions = self.gyro.positions();
        let last = positions.size() - 1;
        let end_bp = self.gyro.back_pos_of(seg.end().buffer_timestamp).min(last);
        let start_bp = self.gyro.back_pos_of(seg.start_point.buffer_timestamp).min(last);
        let sum = positions.get_sum(end_bp, start_bp);
        if sum.x == 0.0 {
            1e6
        } else {
            sum.y.abs() / sum.x.abs()
        }
    }

    // ----- derived signals -----

    #[inline] pub fn has_beat(&self) -> bool { self.prev_beat_segment.is_some() }
    #[inline] pub fn last_beat_timestamp(&self) -> Option<Time> { self.prev_beat_timestamp }
    #[inline] pub fn last_beat_segment(&self) -> Option<&Segment> { self.prev_beat_segment.as_ref() }
    #[inline] pub fn last_segment(&self) -> Option<&Segment> { self.prev_segment.as_ref() }
    /// Amplitude and average velocity of the segment before the last one.
    #[inline] pub fn second_last_segment_stats(&self) -> (f64, f64) { (self.prev_seg_amplitude2, self.prev_seg_avg_velocity2) }
    #[inline] pub fn last_segment_end_timestamp(&self) -> Time { self.prev_seg_end_timestamp }
    #[inline] pub fn current_feed_timestamp(&self) -> Time { self.current_feed_timestamp }

    fn beat_segment(&self) -> &Segment {
        match &self.prev_beat_segment {
            Some(s) => s,
            None => panic!("no beat detected yet"),
        }
    }

    /// Displacement of the last beat, capped at `max_beat_amplitude`. Panics before the first beat.
    pub fn acc_beat_amplitude(&self) -> f64 {
        self.beat_segment().dpos().norm().min(self.config.max_beat_amplitude)
    }

    /// Direction of the last beat's middle around X, mapped onto [0, 1]. Panics before the first beat.
    pub fn acc_beat_frequency(&self) -> f64 {
        frequency_of(&self.beat_segment().middle_of_start_end)
    }

    /// Same mapping over the recent positions, for anticipating the next beat.
    pub fn acc_next_beat_frequency(&self) -> f64 {
        frequency_of(&self.acc.positions().get_average(0, NEXT_BEAT_WINDOW))
    }

    #[inline] pub fn acc_trajectory(&self) -> &Trajectory { &self.acc }
    #[inline] pub fn gyro_trajectory(&self) -> &Trajectory { &self.gyro }
    #[inline] pub fn mag_trajectory(&self) -> &Trajectory { &self.mag }
}

fn frequency_of(pos: &Vector3D) -> f64 {
    let deg = point_to_deg(-pos.z, -pos.y);
    clamp01((deg - BEATS_SCALE_START_ANGLE) / (BEATS_SCALE_END_ANGLE - BEATS_SCALE_START_ANGLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const DT: Time = 0.01;

    struct Feeder {
        engine: AccEngine,
        t:      Time,
        beats:  Vec<i64>,
    }

    impl Feeder {
        fn new() -> Self {
            Self { engine: AccEngine::default(), t: 3.0, beats: Vec::new() }
        }

        fn z(&mut self, zs: &[f64]) {
            for &z in zs {
                self.t += DT;
                let gyro = Vector3D::new(1.0, 0.0, 0.0);
                if self.engine.feed_acc_at(self.t, Vector3D::new(0.0, 0.0, z), gyro, Vector3D::zeros()) {
                    self.beats.push(self.engine.acc_trajectory().timestamps().timestamp());
                }
            }
        }
    }

    fn ramp(from: f64, step: f64, n: usize) -> Vec<f64> {
        (1..=n).map(|i| from + step * i as f64).collect()
    }

    /// Rest, wind up, swing down, rebound.
    fn swing(f: &mut Feeder) {
        f.z(&[0.0, 0.0, 0.0]);
        f.z(&ramp(0.0, 0.1, 5));
        f.z(&ramp(0.5, -0.3, 5));
        f.z(&ramp(-1.0, 0.3, 5));
    }

    #[test]
    fn wind_up_then_swing_is_one_beat() {
        let mut f = Feeder::new();
        swing(&mut f);

        assert_eq!(f.beats.len(), 1, "beats at {:?}", f.beats);
        assert!(f.engine.has_beat());
        assert!(approx_eq!(f64, f.engine.acc_beat_amplitude(), 1.5, epsilon = 1e-9));
        assert!(approx_eq!(f64, f.engine.acc_beat_frequency(), 20.0 / 140.0, epsilon = 1e-9));
        let seg = f.engine.last_beat_segment().map(|s| s.avg_velocity_size()).unwrap_or_default();
        assert!(seg >= f.engine.config().velocity_floor(1.5));
    }

    #[test]
    fn sensor_noise_never_beats() {
        let mut f = Feeder::new();
        let jitter: Vec<f64> = (0..400).map(|i| [0.0, 0.03, -0.02, 0.01, -0.03][i % 5]).collect();
        f.z(&jitter);
        assert!(f.beats.is_empty());
        assert!(!f.engine.has_beat());
    }

    #[test]
    fn swing_without_wind_up_is_vetoed() {
        let mut f = Feeder::new();
        f.z(&[0.0, 0.0, 0.0]);
        f.z(&ramp(0.0, -0.3, 5));
        f.z(&ramp(-1.5, 0.3, 5));
        assert!(f.beats.is_empty(), "beats at {:?}", f.beats);
    }

    #[test]
    fn rotation_dominated_swing_is_rejected() {
        let mut engine = AccEngine::default();
        let mut t = 3.0;
        let mut beats = 0;
        let zs: Vec<f64> = [vec![0.0; 3], ramp(0.0, 0.1, 5), ramp(0.5, -0.3, 5), ramp(-1.0, 0.3, 5)].concat();
        for z in zs {
            t += DT;
            let gyro = Vector3D::new(0.1, 1.0, 0.0);
            beats += engine.feed_acc_at(t, Vector3D::new(0.0, 0.0, z), gyro, Vector3D::zeros()) as usize;
        }
        assert_eq!(beats, 0);
    }

    #[test]
    fn listeners_see_every_feed_until_removed() {
        let mut f = Feeder::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let beats = Arc::new(AtomicUsize::new(0));
        let (c, b) = (calls.clone(), beats.clone());
        let id = f.engine.add_acc_feed_listener(move |beat| {
            c.fetch_add(1, Ordering::Relaxed);
            if beat {
                b.fetch_add(1, Ordering::Relaxed);
            }
        });

        swing(&mut f);
        assert_eq!(calls.load(Ordering::Relaxed), 18);
        assert_eq!(beats.load(Ordering::Relaxed), 1);

        assert!(f.engine.remove_acc_feed_listener(id));
        assert!(!f.engine.remove_acc_feed_listener(id));
        f.z(&[0.0]);
        assert_eq!(calls.load(Ordering::Relaxed), 18);
    }

    #[test]
    fn beat_is_stamped_with_the_detecting_feed() {
        let mut f = Feeder::new();
        f.z(&[0.0, 0.0, 0.0]);
        f.z(&ramp(0.0, 0.1, 5));
        f.z(&ramp(0.5, -0.3, 5));
        let mut checked = false;
        for z in ramp(-1.0, 0.3, 5) {
            f.z(&[z]);
            if f.engine.has_beat() && !checked {
                checked = true;
                assert_eq!(f.engine.last_beat_timestamp(), Some(f.t));
                assert_eq!(f.engine.last_segment_end_timestamp(), f.t);
                let seg_end = f.engine.last_beat_segment().map(|s| s.end().timestamp).unwrap_or_default();
                assert!(seg_end < f.t);
            }
        }
        assert!(checked, "the swing beats");
    }

    #[test]
    fn reset_forgets_the_last_beat() {
        let mut f = Feeder::new();
        swing(&mut f);
        assert!(f.engine.last_beat_timestamp().is_some());
        f.engine.reset_input();
        assert!(!f.engine.has_beat());
        assert_eq!(f.engine.acc_trajectory().segments().occupied(), 1);
    }

    #[test]
    fn next_beat_frequency_follows_recent_positions() {
        let mut f = Feeder::new();
        // resting at -1 g on Z maps to 0 degrees
        f.z(&[-1.0; 30]);
        assert!(approx_eq!(f64, f.engine.acc_next_beat_frequency(), 20.0 / 140.0, epsilon = 1e-9));
    }

    #[test]
    fn config_loads_partial_json() {
        let cfg = BeatConfig::from_json(r#"{ "min_amplitude": 0.5, "max_gyro_strength": 2.0 }"#).unwrap();
        assert_eq!(cfg.min_amplitude, 0.5);
        assert_eq!(cfg.max_gyro_strength, 2.0);
        assert_eq!(cfg.min_big_beat_avg_velocity, 25.0);

        assert!(matches!(BeatConfig::from_json(r#"{ "min_amplitude": -1 }"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(BeatConfig::from_json("{"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn velocity_floor_is_clamped_linear() {
        let cfg = BeatConfig::default();
        assert_eq!(cfg.velocity_floor(0.1), 4.0);
        assert_eq!(cfg.velocity_floor(10.0), 25.0);
        assert!(approx_eq!(f64, cfg.velocity_floor(1.5), 4.0 + 21.0 * 1.2 / 3.7, epsilon = 1e-9));
    }
}
