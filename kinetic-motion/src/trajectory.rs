//! Streaming trajectory segmentation.
//!
//! A [`Trajectory`] keeps the last [`TRAJECTORY_BUFFERS_SIZE`] positions of a 3-axis
//! signal together with their first and second derivatives, and cuts the stream into
//! [`Segment`]s: `Idle` (noise around a fixed point), `Drift` (slow movement) and
//! `Move`. A `Move` also ends when the motion reverses against a reference direction
//! picked by the [`SegmentDetectionType`].
//!
//! Conventions
//! - Positions are addressed by [`BackPos`] (0 = newest) inside one update and by
//!   buffer [`Timestamp`] when stored in a [`Point`]; a stored point is re-resolved
//!   with `back_pos_of` on every tick.
//! - Segments hold copies of their points. A point whose data fell out of the
//!   buffers is still a valid position/time record, it just can't be re-read.

use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use kinetic_core::buffers::{BackPos, CircularBuffer, CircularSummedBuffer, Timestamp};
use kinetic_core::dsp::rad_to_deg;
use kinetic_core::sound::Time;

pub type Vector3D = Vector3<f64>;

// ---------------------------------- Constants ------------------------------------

/// In samples.
pub const TRAJECTORY_BUFFERS_SIZE: usize = 10_000;
pub const POINTS_BUFFER_SIZE: usize = TRAJECTORY_BUFFERS_SIZE * 4;

/// Sensor noise floor, in g.
pub const ACC_NOISE_SIZE: f64 = 0.07;
/// Max number of neighbours the local velocity window widens over.
pub const LOCAL_VELOCITY_MAX_SPREAD: usize = 2;

/// Max displacement from the idle anchor, in g.
pub const MAX_IDLE_DPOS: f64 = ACC_NOISE_SIZE * 2.0;
pub const MIN_IDLE_DURATION: Time = 0.08;

/// g per second.
pub const MAX_DRIFT_SPEED: f64 = 3.0;
pub const MIN_DRIFT_DURATION: Time = 0.08;

/// Local velocity at least this far (degrees) from the reference counts as reversing.
pub const MOVING_AGAINST_MIN_ANGLE: f64 = 110.0;

/// Buffer timestamp before which idle/drift detection stays off.
const MIN_CLASSIFIED_TIMESTAMP: Timestamp = 5;

#[inline]
pub fn z_axis() -> Vector3D {
    Vector3D::new(0.0, 0.0, 1.0)
}

/// Angle between two vectors in degrees; 0 when either is zero.
#[inline]
pub fn angle_deg(a: &Vector3D, b: &Vector3D) -> f64 {
    rad_to_deg(a.angle(b))
}

// ------------------------------------ Types --------------------------------------

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SegmentType {
    #[default]
    Undefined,
    /// Vibrating in place, noise only.
    Idle,
    /// Slow movement, noise that accumulates.
    Drift,
    /// Steps bigger than noise.
    Move,
}

/// How an open `Move`/`Drift` segment detects that the motion reversed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SegmentDetectionType {
    /// No segmentation at all; the trajectory only buffers.
    None,
    /// Against the chord from the segment start to the previous sample.
    MovingAgainstSegment,
    /// Same chord, with the local velocity projected on the Y/Z plane.
    MovingAgainstSegmentInZ,
    /// Against any local velocity since the last peak.
    MovingAgainstPast,
    /// Against the peak or wide-peak velocity.
    MovingAgainstPeak,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Point {
    pub abs_pos:          Vector3D,
    pub timestamp:        Time,
    pub buffer_timestamp: Timestamp,
}

impl Default for Point {
    fn default() -> Self {
        Self { abs_pos: Vector3D::zeros(), timestamp: 0.0, buffer_timestamp: 0 }
    }
}

impl Point {
    pub fn new(abs_pos: Vector3D, timestamp: Time, buffer_timestamp: Timestamp) -> Self {
        Self { abs_pos, timestamp, buffer_timestamp }
    }

    #[inline]
    pub fn distance_to(&self, pos: &Vector3D) -> f64 {
        (pos - self.abs_pos).norm()
    }
}

/// Timestamps a segment's peak moved through, newest last. Keeps only the latest few.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PeakHistory {
    stamps: [Timestamp; PeakHistory::CAPACITY],
    pushed: usize,
}

impl PeakHistory {
    pub const CAPACITY: usize = 8;

    pub fn push(&mut self, ts: Timestamp) {
        self.stamps[self.pushed % Self::CAPACITY] = ts;
        self.pushed += 1;
    }

    #[inline] pub fn len(&self) -> usize { self.pushed.min(Self::CAPACITY) }
    #[inline] pub fn is_empty(&self) -> bool { self.pushed == 0 }
    /// Peak moves recorded in total, including the forgotten ones.
    #[inline] pub fn pushed(&self) -> usize { self.pushed }

    pub fn last(&self) -> Option<Timestamp> {
        self.pushed.checked_sub(1).map(|i| self.stamps[i % Self::CAPACITY])
    }

    /// Oldest kept first.
    pub fn iter(&self) -> impl Iterator<Item = Timestamp> + '_ {
        (self.pushed - self.len()..self.pushed).map(|i| self.stamps[i % Self::CAPACITY])
    }
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub segment_type:       SegmentType,
    pub start_point:        Point,
    pub end_point:          Option<Point>,
    /// Sample with the highest instantaneous speed.
    pub peak_point:         Option<Point>,
    /// Sample with the highest speed over a 3-sample window.
    pub wide_peak_point:    Option<Point>,
    /// Samples between start and end, both included.
    pub samples_num:        usize,
    pub detected_grav:      Vector3D,
    pub traveled_length:    f64,
    pub avg_velocity:       Vector3D,
    pub top_velocity:       Vector3D,
    pub weight_center:      Vector3D,
    pub middle_of_start_end: Vector3D,

    pub peak_history:      PeakHistory,
    pub wide_peak_history: PeakHistory,
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(Point::default())
    }
}

impl Segment {
    pub fn new(start_point: Point) -> Self {
        Self {
            segment_type: SegmentType::Undefined,
            start_point,
            end_point: None,
            peak_point: None,
            wide_peak_point: None,
            samples_num: 0,
            detected_grav: Vector3D::zeros(),
            traveled_length: 0.0,
            avg_velocity: Vector3D::zeros(),
            top_velocity: Vector3D::zeros(),
            weight_center: Vector3D::zeros(),
            middle_of_start_end: Vector3D::zeros(),
            peak_history: PeakHistory::default(),
            wide_peak_history: PeakHistory::default(),
        }
    }

    #[inline] pub fn is_finished(&self) -> bool { self.end_point.is_some() }

    /// End point of a closed segment. Panics on an open one.
    #[inline]
    pub fn end(&self) -> &Point {
        match &self.end_point {
            Some(p) => p,
            None => panic!("segment starting at {} is still open", self.start_point.buffer_timestamp),
        }
    }

    #[inline]
    fn peak(&self) -> &Point {
        match &self.peak_point {
            Some(p) => p,
            None => panic!("segment starting at {} has no peak", self.start_point.buffer_timestamp),
        }
    }

    /// Chord from start to end.
    #[inline] pub fn dpos(&self) -> Vector3D { self.end().abs_pos - self.start_point.abs_pos }
    #[inline] pub fn duration(&self) -> Time { self.end().timestamp - self.start_point.timestamp }
    #[inline] pub fn duration_to_peak(&self) -> Time { self.peak().timestamp - self.start_point.timestamp }
    #[inline] pub fn duration_after_peak(&self) -> Time { self.end().timestamp - self.peak().timestamp }

    /// Traveled length over duration.
    pub fn avg_velocity_size(&self) -> f64 {
        let d = self.duration();
        if d > 0.0 { self.traveled_length / d } else { 0.0 }
    }

    pub fn contains_point(&self, point: &Point, include_start_and_end: bool) -> bool {
        let (s, e, t) = (self.start_point.timestamp, self.end().timestamp, point.timestamp);
        if include_start_and_end { t >= s && t <= e } else { t > s && t < e }
    }

    /// Extend backwards over the segment that ends where this one starts.
    pub fn merge_prev(&mut self, prev: &Segment) {
        assert_eq!(prev.end_point, Some(self.start_point), "segments are not adjacent");
        self.start_point = prev.start_point;
    }

    /// Extend forwards over the segment that starts where this one ends.
    pub fn merge_next(&mut self, next: &Segment) {
        assert_eq!(self.end_point, Some(next.start_point), "segments are not adjacent");
        self.end_point = next.end_point;
    }
}

// --------------------------------- Trajectory ------------------------------------

#[derive(Clone, Debug)]
pub struct Trajectory {
    detection_type: SegmentDetectionType,
    points:         CircularBuffer<Point>,
    segments:       CircularBuffer<Segment>,

    timestamps: CircularBuffer<Time>,
    pos:        CircularSummedBuffer<Vector3D>,
    velocity:   CircularSummedBuffer<Vector3D>,
    acc:        CircularSummedBuffer<Vector3D>,

    feeds_counter:           u64,
    processed_feeds_counter: u64,
    last_feed_timestamp:     Time,
    segment_just_ended:      bool,
    last_end_reason:         &'static str,

    is_idling_since:   Timestamp,
    is_drifting_since: Timestamp,
}

impl Trajectory {
    pub fn new(detection_type: SegmentDetectionType) -> Self {
        let summed = || {
            let mut b = CircularSummedBuffer::new(TRAJECTORY_BUFFERS_SIZE, true);
            b.fill_with(Vector3D::zeros());
            b
        };
        let mut t = Self {
            detection_type,
            points: CircularBuffer::new(POINTS_BUFFER_SIZE, false),
            segments: CircularBuffer::new(TRAJECTORY_BUFFERS_SIZE, false),
            timestamps: CircularBuffer::new(TRAJECTORY_BUFFERS_SIZE, false),
            pos: summed(),
            velocity: summed(),
            acc: summed(),
            feeds_counter: 0,
            processed_feeds_counter: 0,
            last_feed_timestamp: 0.0,
            segment_just_ended: false,
            last_end_reason: "",
            is_idling_since: 0,
            is_drifting_since: 0,
        };

        // a few samples of rest so derivatives and back positions are defined
        for time in [1.0, 2.0, 3.0] {
            t.feed_new_position(Vector3D::zeros(), time);
        }
        t.processed_feeds_counter = t.feeds_counter;

        let origin = Point::new(Vector3D::zeros(), *t.timestamps.get(0), t.timestamps.timestamp());
        t.points.push(origin);
        t.segments.push(Segment::new(origin));
        t
    }

    /// Fresh trajectory with the same detection type.
    pub fn reset(&mut self) {
        *self = Self::new(self.detection_type);
    }

    pub fn feed_new_position(&mut self, new_pos: Vector3D, timestamp: Time) {
        let mut dt = timestamp - self.last_feed_timestamp;
        if dt == 0.0 {
            dt = 0.001;
        }
        assert!(dt > 0.0, "trajectory fed out of order: {timestamp} after {}", self.last_feed_timestamp);
        self.last_feed_timestamp = timestamp;

        self.timestamps.push(timestamp);

        let prev_pos = self.pos.get(0);
        self.pos.push(new_pos);

        let v = (new_pos - prev_pos) * (1.0 / dt);
        let prev_v = self.velocity.get(0);
        self.velocity.push(v);

        self.acc.push((v - prev_v) * (1.0 / dt));

        self.feeds_counter += 1;
    }

    /// Classify every sample fed since the last call.
    pub fn update(&mut self) {
        let mut to_process = self.feeds_counter - self.processed_feeds_counter;
        self.processed_feeds_counter = self.feeds_counter;
        self.segment_just_ended = false;

        if self.detection_type == SegmentDetectionType::None {
            return;
        }

        while to_process > 0 {
            to_process -= 1;
            self.process_sample(to_process as BackPos);
        }
    }

    fn process_sample(&mut self, when: BackPos) {
        let mut segment = std::mem::take(self.segments.get_mut(0));

        let mut end_back_pos = when;
        let mut reason = "";

        let drifting_since = self.is_drifting(when);
        let idling_since = self.is_idling(when);

        if let Some(since) = idling_since {
            match segment.segment_type {
                SegmentType::Undefined => segment.segment_type = SegmentType::Idle,
                SegmentType::Move => {
                    end_back_pos = since;
                    reason = "idling";
                }
                _ => {}
            }
        } else if let Some(since) = drifting_since {
            match segment.segment_type {
                SegmentType::Undefined => segment.segment_type = SegmentType::Drift,
                // idle and drift are both low-energy: merge instead of splitting
                SegmentType::Idle => segment.segment_type = SegmentType::Drift,
                SegmentType::Move => {
                    end_back_pos = since;
                    reason = "drifting";
                }
                SegmentType::Drift => {}
            }
        } else {
            match segment.segment_type {
                SegmentType::Idle => {
                    end_back_pos = when + 1;
                    reason = "not idling";
                }
                SegmentType::Drift => {
                    end_back_pos = when + 1;
                    reason = "not drifting";
                }
                _ => segment.segment_type = SegmentType::Move,
            }
        }

        if reason.is_empty() && matches!(segment.segment_type, SegmentType::Move | SegmentType::Drift) {
            let against = match self.detection_type {
                SegmentDetectionType::MovingAgainstSegment | SegmentDetectionType::MovingAgainstSegmentInZ => {
                    self.is_moving_against_segment(when, &segment).map(|s| (s, "against segment"))
                }
                SegmentDetectionType::MovingAgainstPeak => {
                    self.is_moving_against_peak(when, &segment).map(|s| (s, "against peak"))
                }
                SegmentDetectionType::MovingAgainstPast => {
                    self.is_moving_against_past(when, &segment).map(|s| (s, "against past"))
                }
                SegmentDetectionType::None => None,
            };
            if let Some((since, r)) = against {
                end_back_pos = since;
                reason = r;
            }
        }

        self.update_detected_grav(when, &mut segment);
        self.update_segment_peaks(when, &mut segment);

        if reason.is_empty() {
            *self.segments.get_mut(0) = segment;
            return;
        }

        // never end before the start, never past the retained horizon
        let seg_start_back_pos = self.back_pos_of(segment.start_point.buffer_timestamp);
        let end_back_pos = end_back_pos.min(seg_start_back_pos).min(self.timestamps.occupied() - 1);

        let end_point = self.push_new_point(end_back_pos);
        segment.end_point = Some(end_point);
        self.calc_segment_params(&mut segment);

        debug!(
            "segment end ({reason}): type={}, dur={:.3}s/{} samples, amp={:.3}, avg_vel={:.2}, a_to_z={:.1}",
            segment.segment_type,
            segment.duration(),
            segment.samples_num,
            segment.dpos().norm(),
            segment.avg_velocity_size(),
            angle_deg(&segment.dpos(), &z_axis()),
        );

        *self.segments.get_mut(0) = segment;
        self.segments.push(Segment::new(end_point));
        self.last_end_reason = reason;
        self.segment_just_ended = true;
    }

    /// Fill the summary fields of a segment whose end point is set.
    pub fn calc_segment_params(&self, segment: &mut Segment) {
        let start = segment.start_point;
        let end = *segment.end();

        segment.samples_num = (1 + end.buffer_timestamp - start.buffer_timestamp).max(1) as usize;
        let one_div_samples = 1.0 / segment.samples_num as f64;

        segment.avg_velocity = Vector3D::zeros();
        segment.weight_center = Vector3D::zeros();
        segment.traveled_length = 0.0;

        for t in start.buffer_timestamp..=end.buffer_timestamp {
            if !self.pos.is_still_in_buffer(t) || !self.timestamps.is_still_in_buffer(t) {
                continue;
            }
            let bp = self.back_pos_of(t);
            segment.avg_velocity += self.velocity.get(bp);
            segment.weight_center += self.pos.get(bp);
            segment.traveled_length += self.pos.get_diff(bp).norm();
        }

        segment.avg_velocity *= one_div_samples;
        segment.weight_center *= one_div_samples;
        segment.middle_of_start_end = (start.abs_pos + end.abs_pos) * 0.5;
        if let Some(peak) = segment.peak_point.filter(|p| self.is_point_data_in_buffer(p)) {
            segment.top_velocity = self.velocity.get_by_timestamp(peak.buffer_timestamp);
        }
    }

    fn point_at(&self, when: BackPos) -> Point {
        Point::new(self.pos.get(when), *self.timestamps.get(when), self.timestamp_of(when))
    }

    fn push_new_point(&mut self, when: BackPos) -> Point {
        let p = self.point_at(when);
        self.points.push(p);
        p
    }

    // ----- velocity estimates -----

    /// Velocity over `[when + 2, when - 1]`. Needs `when >= 1` and `when + 2` buffered.
    pub fn wide_velocity(&self, when: BackPos) -> Vector3D {
        assert!(when >= 1 && self.is_back_pos_in_buffer(when + 2), "no wide window around back pos {when}");
        let dpos = self.pos.get(when - 1) - self.pos.get(when + 2);
        let dur = self.timestamps.get(when - 1) - self.timestamps.get(when + 2);
        dpos * (1.0 / dur)
    }

    #[inline]
    fn has_wide_velocity(&self, when: BackPos) -> bool {
        when >= 1 && self.is_back_pos_in_buffer(when + 2)
    }

    /// One-sample velocity, widened symmetrically while the step is under the noise floor.
    pub fn local_velocity(&self, when: BackPos) -> Vector3D {
        let mut dpos = self.pos.get_diff(when);
        let mut duration = self.timestamps.get_diff(when);

        let mut spread = 1;
        let mut from = when + 1;
        let mut to = when;
        while dpos.norm() < ACC_NOISE_SIZE && spread <= LOCAL_VELOCITY_MAX_SPREAD {
            if self.is_back_pos_in_buffer(from + 1) {
                from += 1;
            }
            if to >= 1 {
                to -= 1;
            }
            spread += 1;

            dpos = self.pos.get(to) - self.pos.get(from);
            duration = self.timestamps.get(to) - self.timestamps.get(from);
        }

        if duration <= 0.0 {
            return Vector3D::zeros();
        }
        dpos * (1.0 / duration)
    }

    pub fn is_accelerating(&self, when: BackPos) -> bool {
        if self.pos.get_diff(when).norm() <= ACC_NOISE_SIZE {
            return false;
        }
        self.local_velocity(when).norm() > self.local_velocity(when + 1).norm()
    }

    pub fn is_decelerating(&self, when: BackPos) -> bool {
        self.local_velocity(when).norm() < self.local_velocity(when + 1).norm()
    }

    // ----- reversal detectors -----

    /// Walk back from `when` while the local velocity points at least 110° away from
    /// `against`. Returns the oldest such back position, if any was found.
    pub fn is_moving_against(&self, against: &Vector3D, when: BackPos, in_z: bool) -> Option<BackPos> {
        let mut since = when;
        while self.is_back_pos_in_buffer(since + 1) {
            let mut v = self.local_velocity(since);
            if in_z {
                // judged in the Y/Z plane
                v.x = 0.0;
            }
            if angle_deg(&v, against) < MOVING_AGAINST_MIN_ANGLE {
                break;
            }
            since += 1;
        }
        (since > when).then_some(since)
    }

    #[inline]
    fn in_z(&self) -> bool {
        self.detection_type == SegmentDetectionType::MovingAgainstSegmentInZ
    }

    fn is_moving_against_segment(&self, when: BackPos, segment: &Segment) -> Option<BackPos> {
        let seg_start = self.back_pos_of(segment.start_point.buffer_timestamp);
        let seg_end = when + 1;
        if (seg_start as i64) - (seg_end as i64) < 4 {
            return None;
        }

        let start_bp = if self.pos.is_back_pos_occupied(seg_start) { seg_start } else { self.pos.occupied() - 1 };
        let seg_vec = self.pos.get(seg_end) - self.pos.get(start_bp);
        self.is_moving_against(&seg_vec, when, self.in_z())
    }

    fn is_moving_against_peak(&self, when: BackPos, segment: &Segment) -> Option<BackPos> {
        if let Some(peak) = segment.peak_point.filter(|p| self.is_point_data_in_buffer(p)) {
            let v = self.velocity.get_by_timestamp(peak.buffer_timestamp);
            if let Some(since) = self.is_moving_against(&v, when, false) {
                return Some(since);
            }
        }
        let wide_peak = segment.wide_peak_point?;
        let bp = self.back_pos_of(wide_peak.buffer_timestamp);
        if !self.has_wide_velocity(bp) {
            return None;
        }
        self.is_moving_against(&self.wide_velocity(bp), when, false)
    }

    fn is_moving_against_past(&self, when: BackPos, segment: &Segment) -> Option<BackPos> {
        let up_to = self.last_peak_or_start(segment);
        (when + 1..up_to)
            .take_while(|&past| self.is_back_pos_in_buffer(past + 1))
            .find_map(|past| self.is_moving_against(&self.local_velocity(past), when, false))
    }

    fn last_peak_or_start(&self, segment: &Segment) -> BackPos {
        let mut point = segment.peak_point.unwrap_or(segment.start_point);
        if let Some(wide) = segment.wide_peak_point {
            if wide.buffer_timestamp > point.buffer_timestamp {
                point = wide;
            }
        }
        self.back_pos_of(point.buffer_timestamp)
    }

    // ----- idle / drift -----

    fn is_idling(&mut self, when: BackPos) -> Option<BackPos> {
        if self.timestamp_of(when) < MIN_CLASSIFIED_TIMESTAMP {
            return None;
        }
        let when_pos = self.pos.get(when);
        let when_time = *self.timestamps.get(when);

        let mut since = if self.is_idling_since > 0 { self.back_pos_of(self.is_idling_since) } else { when };
        if !self.pos.is_back_pos_occupied(since) {
            since = self.pos.occupied() - 1;
        }
        let since_time = *self.timestamps.get(since);
        let idling = (when_pos - self.pos.get(since)).norm() <= MAX_IDLE_DPOS;

        if idling && when_time - since_time >= MIN_IDLE_DURATION {
            return Some(since);
        }
        if !idling {
            self.is_idling_since = 0;
        } else if self.is_idling_since == 0 {
            self.is_idling_since = self.timestamp_of(since);
        }
        None
    }

    fn is_drifting(&mut self, when: BackPos) -> Option<BackPos> {
        if self.timestamp_of(when) < MIN_CLASSIFIED_TIMESTAMP {
            return None;
        }
        let when_time = *self.timestamps.get(when);

        let mut since = if self.is_drifting_since > 0 { self.back_pos_of(self.is_drifting_since) } else { when };
        if !self.timestamps.is_back_pos_occupied(since) {
            since = self.timestamps.occupied() - 1;
        }
        let since_time = *self.timestamps.get(since);
        let drifting = self.velocity.get(when).norm() <= MAX_DRIFT_SPEED;

        if drifting && when_time - since_time >= MIN_DRIFT_DURATION {
            return Some(since);
        }
        if !drifting {
            self.is_drifting_since = 0;
        } else if self.is_drifting_since == 0 {
            self.is_drifting_since = self.timestamp_of(since);
        }
        None
    }

    // ----- per-sample segment bookkeeping -----

    /// Interpolate the point where |pos| crosses 1 g.
    fn update_detected_grav(&self, when: BackPos, segment: &mut Segment) {
        let new_pos = self.pos.get(when);
        let prev_pos = self.pos.get(when + 1);
        let new_size = new_pos.norm();
        let prev_size = prev_pos.norm();

        if new_size == 1.0 {
            segment.detected_grav = new_pos;
        } else if (new_size > 1.0) != (prev_size > 1.0) {
            let dsize = new_size - prev_size;
            segment.detected_grav = new_pos * ((1.0 - prev_size) / dsize) + prev_pos * ((new_size - 1.0) / dsize);
        }
    }

    fn update_segment_peaks(&mut self, when: BackPos, segment: &mut Segment) {
        if self.pos.get_diff(when).norm() <= ACC_NOISE_SIZE {
            return;
        }

        let when_vel = self.velocity.get(when).norm();
        match segment.peak_point {
            None => {
                segment.peak_point = Some(self.push_new_point(when));
                segment.peak_history.push(self.timestamp_of(when));
            }
            Some(peak) => {
                let peak_vel = if self.is_point_data_in_buffer(&peak) {
                    self.velocity.get_by_timestamp(peak.buffer_timestamp).norm()
                } else {
                    0.0
                };
                if when_vel >= peak_vel {
                    segment.peak_point = Some(self.point_at(when));
                    segment.peak_history.push(self.timestamp_of(when));
                }
            }
        }

        let wide_when = when + 1;
        let wide_when2 = when + 2;
        let Some(wide_peak) = segment.wide_peak_point else {
            segment.wide_peak_point = Some(self.push_new_point(wide_when));
            segment.wide_peak_history.push(self.timestamp_of(wide_when));
            return;
        };

        let wide_speed = |bp: BackPos| if self.has_wide_velocity(bp) { self.wide_velocity(bp).norm() } else { 0.0 };
        let wide_vel = wide_speed(wide_when);
        let wide_vel2 = wide_speed(wide_when2);
        let peak_vel = wide_speed(self.back_pos_of(wide_peak.buffer_timestamp));

        // prefer the older sample only when the window is still rising into it
        let chosen = if wide_vel2 >= peak_vel && wide_vel2 > wide_vel {
            Some(wide_when2)
        } else if wide_vel >= peak_vel {
            Some(wide_when)
        } else {
            None
        };
        if let Some(bp) = chosen {
            let ts = self.timestamp_of(bp);
            segment.wide_peak_point = Some(self.point_at(bp));
            if segment.wide_peak_history.last() != Some(ts) {
                segment.wide_peak_history.push(ts);
            }
        }
    }

    // ----- accessors -----

    #[inline] pub fn detection_type(&self) -> SegmentDetectionType { self.detection_type }
    #[inline] pub fn just_ended(&self) -> bool { self.segment_just_ended }
    /// Why the last segment ended, for diagnostics.
    #[inline] pub fn last_end_reason(&self) -> &'static str { self.last_end_reason }

    #[inline] pub fn segments(&self) -> &CircularBuffer<Segment> { &self.segments }
    #[inline] pub fn points(&self) -> &CircularBuffer<Point> { &self.points }
    #[inline] pub fn timestamps(&self) -> &CircularBuffer<Time> { &self.timestamps }
    #[inline] pub fn positions(&self) -> &CircularSummedBuffer<Vector3D> { &self.pos }
    #[inline] pub fn velocities(&self) -> &CircularSummedBuffer<Vector3D> { &self.velocity }
    #[inline] pub fn accelerations(&self) -> &CircularSummedBuffer<Vector3D> { &self.acc }

    /// Newest segment that started at or before `buffer_timestamp`.
    pub fn segment_at(&self, buffer_timestamp: Timestamp) -> Option<&Segment> {
        self.segments.iter().find(|s| s.start_point.buffer_timestamp <= buffer_timestamp)
    }

    #[inline] pub fn back_pos_of(&self, buffer_timestamp: Timestamp) -> BackPos { self.timestamps.back_pos_of(buffer_timestamp) }
    #[inline] pub fn timestamp_of(&self, back_pos: BackPos) -> Timestamp { self.timestamps.timestamp_of(back_pos) }
    #[inline] pub fn is_back_pos_in_buffer(&self, back_pos: BackPos) -> bool { self.timestamps.is_back_pos_occupied(back_pos) }

    #[inline]
    pub fn is_point_data_in_buffer(&self, point: &Point) -> bool {
        self.timestamps.is_still_in_buffer(point.buffer_timestamp)
    }
}
