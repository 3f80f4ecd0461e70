//! Ring buffers indexed backwards from the newest element.
//!
//! Contents
//! - `CircularBuffer<T>`       : plain ring of values (points, segments, timestamps)
//! - `CircularSummedBuffer<T>` : ring of running prefix sums; O(1) range sums/averages
//!
//! Conventions
//! - A [`BackPos`] counts back from the newest element (0 = newest).
//! - A [`Timestamp`] counts pushes; it starts at -1 so the first push is timestamp 0.
//! - Reading an unoccupied back position panics. Callers check
//!   `is_back_pos_occupied` first.
//! - Pushing into a full buffer silently evicts the oldest element.

use core::ops::{Add, AddAssign, Mul, Sub};

use num_traits::Zero;

pub type Timestamp = i64;
pub type BackPos = usize;

/// Element type of a [`CircularSummedBuffer`].
pub trait Summable: Copy + Zero + Add<Output = Self> + Sub<Output = Self> + Mul<f64, Output = Self> {}

impl<T> Summable for T where T: Copy + Zero + Add<Output = T> + Sub<Output = T> + Mul<f64, Output = T> {}

// ----------------------------------- CircularBuffer --------------------------------

#[derive(Clone, Debug)]
pub struct CircularBuffer<T> {
    buffer:    Vec<T>,
    occupied:  usize,
    pos:       usize,      // physical index of the newest element
    timestamp: Timestamp,
}

impl<T: Clone + Default> CircularBuffer<T> {
    pub fn new(size: usize, initially_full: bool) -> Self {
        assert!(size > 0, "circular buffer needs a non-zero size");
        Self {
            buffer: vec![T::default(); size],
            occupied: if initially_full { size } else { 0 },
            pos: size - 1,
            timestamp: -1,
        }
    }

    pub fn fill_with(&mut self, value: T) {
        self.occupied = self.buffer.len();
        for slot in self.buffer.iter_mut() {
            *slot = value.clone();
        }
    }

    pub fn push(&mut self, value: T) {
        if self.occupied < self.buffer.len() {
            self.occupied += 1;
        }
        self.timestamp += 1;
        self.pos = (self.pos + 1) % self.buffer.len();
        self.buffer[self.pos] = value;
    }

    /// Remove and return the newest element.
    pub fn pop(&mut self) -> T {
        assert!(self.occupied > 0, "pop from an empty circular buffer");
        let value = self.get(0).clone();
        self.occupied -= 1;
        self.timestamp -= 1;
        self.pos = if self.pos == 0 { self.buffer.len() - 1 } else { self.pos - 1 };
        value
    }
}

impl<T> CircularBuffer<T> {
    #[inline]
    fn abs_pos(&self, back_pos: BackPos) -> usize {
        assert!(
            self.is_back_pos_occupied(back_pos),
            "back pos {back_pos} is outside the {} occupied slots",
            self.occupied
        );
        (self.pos + self.buffer.len() - back_pos) % self.buffer.len()
    }

    #[inline]
    pub fn get(&self, back_pos: BackPos) -> &T {
        &self.buffer[self.abs_pos(back_pos)]
    }

    #[inline]
    pub fn get_mut(&mut self, back_pos: BackPos) -> &mut T {
        let i = self.abs_pos(back_pos);
        &mut self.buffer[i]
    }

    #[inline]
    pub fn get_by_timestamp(&self, timestamp: Timestamp) -> &T {
        self.get(self.back_pos_of(timestamp))
    }

    #[inline]
    pub fn back_pos_of(&self, timestamp: Timestamp) -> BackPos {
        debug_assert!(timestamp <= self.timestamp, "timestamp {timestamp} is in the future");
        (self.timestamp - timestamp) as BackPos
    }

    #[inline] pub fn timestamp(&self) -> Timestamp { self.timestamp }
    #[inline] pub fn timestamp_of(&self, back_pos: BackPos) -> Timestamp { self.timestamp - back_pos as Timestamp }
    #[inline] pub fn is_still_in_buffer(&self, timestamp: Timestamp) -> bool { self.timestamp - timestamp < self.occupied as Timestamp }
    #[inline] pub fn is_back_pos_occupied(&self, back_pos: BackPos) -> bool { back_pos < self.occupied }
    #[inline] pub fn occupied(&self) -> usize { self.occupied }
    #[inline] pub fn size(&self) -> usize { self.buffer.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.occupied == 0 }

    /// Occupied elements, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.occupied).map(move |bp| self.get(bp))
    }
}

impl<T: AddAssign + Copy> CircularBuffer<T> {
    /// Add to the newest element in place.
    #[inline]
    pub fn add_to_last(&mut self, value: T) {
        self.buffer[self.pos] += value;
    }
}

impl<T: Copy + Sub<Output = T>> CircularBuffer<T> {
    /// `get(bp) - get(bp + 1)`, or `get(bp)` when `bp` is the oldest element.
    pub fn get_diff(&self, back_pos: BackPos) -> T {
        let v = *self.get(back_pos);
        if self.is_back_pos_occupied(back_pos + 1) {
            v - *self.get(back_pos + 1)
        } else {
            v
        }
    }
}

impl<T: Summable> CircularBuffer<T> {
    /// Mean over `from..=to`, summed element by element.
    pub fn get_average(&self, from: BackPos, to: BackPos) -> T {
        let mut sum = T::zero();
        for bp in from..=to {
            sum = sum + *self.get(bp);
        }
        sum * (1.0 / (to - from + 1) as f64)
    }
}

// -------------------------------- CircularSummedBuffer -----------------------------

/// Each slot holds the running sum of the values pushed since physical index 0 of
/// the current lap, so any contiguous range is one or two subtractions away. The
/// slot overwritten by the newest push held the previous lap's sum just before the
/// oldest element; it is kept in `evicted` so the oldest element stays readable.
#[derive(Clone, Debug)]
pub struct CircularSummedBuffer<T> {
    buffer:    Vec<T>,
    occupied:  usize,
    pos:       usize,
    timestamp: Timestamp,
    evicted:   T,
}

impl<T: Summable> CircularSummedBuffer<T> {
    pub fn new(size: usize, initially_full: bool) -> Self {
        assert!(size > 0, "circular buffer needs a non-zero size");
        Self {
            buffer: vec![T::zero(); size],
            occupied: if initially_full { size } else { 0 },
            pos: size - 1,
            timestamp: -1,
            evicted: T::zero(),
        }
    }

    /// Declare the buffer full of `value` and rebuild the prefix sums.
    pub fn fill_with(&mut self, value: T) {
        self.occupied = self.buffer.len();
        let mut sum = T::zero();
        for slot in self.buffer.iter_mut() {
            sum = sum + value;
            *slot = sum;
        }
        self.evicted = self.buffer[self.pos];
    }

    pub fn push(&mut self, value: T) {
        if self.occupied < self.buffer.len() {
            self.occupied += 1;
        }
        self.timestamp += 1;
        self.pos = (self.pos + 1) % self.buffer.len();
        self.evicted = self.buffer[self.pos];
        self.buffer[self.pos] = if self.pos > 0 { self.buffer[self.pos - 1] + value } else { value };
    }

    /// Add to the newest element. Only the newest slot is touched, so the prefix
    /// sums of older slots stay valid.
    #[inline]
    pub fn add_to_last(&mut self, value: T) {
        self.buffer[self.pos] = self.buffer[self.pos] + value;
    }

    pub fn pop(&mut self) -> T {
        assert!(self.occupied > 0, "pop from an empty circular buffer");
        let value = self.get(0);
        self.occupied -= 1;
        self.timestamp -= 1;
        self.buffer[self.pos] = self.evicted;
        self.pos = if self.pos == 0 { self.buffer.len() - 1 } else { self.pos - 1 };
        value
    }

    #[inline]
    fn abs_pos(&self, back_pos: BackPos) -> usize {
        assert!(
            self.is_back_pos_occupied(back_pos),
            "back pos {back_pos} is outside the {} occupied slots",
            self.occupied
        );
        (self.pos + self.buffer.len() - back_pos) % self.buffer.len()
    }

    /// Running sum of the lap just before physical index `i`.
    #[inline]
    fn prefix_before(&self, i: usize) -> T {
        if i == 0 {
            T::zero()
        } else if i - 1 == self.pos {
            self.evicted
        } else {
            self.buffer[i - 1]
        }
    }

    /// The element itself, reconstructed from neighbouring prefix sums.
    #[inline]
    pub fn get(&self, back_pos: BackPos) -> T {
        let i = self.abs_pos(back_pos);
        self.buffer[i] - self.prefix_before(i)
    }

    #[inline]
    pub fn get_by_timestamp(&self, timestamp: Timestamp) -> T {
        self.get(self.back_pos_of(timestamp))
    }

    pub fn get_diff(&self, back_pos: BackPos) -> T {
        let v = self.get(back_pos);
        if self.is_back_pos_occupied(back_pos + 1) {
            v - self.get(back_pos + 1)
        } else {
            v
        }
    }

    /// Sum over `from..=to` (newer..=older) in O(1).
    pub fn get_sum(&self, from: BackPos, to: BackPos) -> T {
        assert!(from <= to, "range {from}..={to} is reversed");
        assert!(to < self.occupied, "range end {to} is outside the {} occupied slots", self.occupied);

        let from_abs = self.abs_pos(from);
        let to_abs = self.abs_pos(to);
        let mut sum = self.buffer[from_abs];
        // range wraps past physical 0: add the tail of the previous lap
        if to_abs > from_abs {
            sum = sum + self.buffer[self.buffer.len() - 1];
        }
        sum - self.prefix_before(to_abs)
    }

    #[inline]
    pub fn get_average(&self, from: BackPos, to: BackPos) -> T {
        self.get_sum(from, to) * (1.0 / (to - from + 1) as f64)
    }
}

impl<T> CircularSummedBuffer<T> {
    #[inline]
    pub fn back_pos_of(&self, timestamp: Timestamp) -> BackPos {
        debug_assert!(timestamp <= self.timestamp, "timestamp {timestamp} is in the future");
        (self.timestamp - timestamp) as BackPos
    }

    #[inline] pub fn timestamp(&self) -> Timestamp { self.timestamp }
    #[inline] pub fn timestamp_of(&self, back_pos: BackPos) -> Timestamp { self.timestamp - back_pos as Timestamp }
    #[inline] pub fn is_still_in_buffer(&self, timestamp: Timestamp) -> bool { self.timestamp - timestamp < self.occupied as Timestamp }
    #[inline] pub fn is_back_pos_occupied(&self, back_pos: BackPos) -> bool { back_pos < self.occupied }
    #[inline] pub fn occupied(&self) -> usize { self.occupied }
    #[inline] pub fn size(&self) -> usize { self.buffer.len() }
}

// ------------------------------------ Tests --------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn wobble(i: usize) -> f64 {
        ((i * 7919) % 113) as f64 * 0.01 - 0.5
    }

    fn naive_mean(values: &[f64], k: usize) -> f64 {
        let tail = &values[values.len() - 1 - k..];
        tail.iter().sum::<f64>() / (k + 1) as f64
    }

    #[test]
    fn summed_average_matches_naive_mean() {
        let cap = 16;
        for pushes in [5, 16, 23, 40, 61] {
            let mut buf = CircularSummedBuffer::<f64>::new(cap, false);
            let mut pushed = Vec::new();
            for i in 0..pushes {
                buf.push(wobble(i));
                pushed.push(wobble(i));
            }
            for k in 0..buf.occupied() {
                let fast = buf.get_average(0, k);
                let slow = naive_mean(&pushed, k);
                assert!(approx_eq!(f64, fast, slow, epsilon = 1e-9), "pushes={pushes} k={k} fast={fast} slow={slow}");
            }
        }
    }

    #[test]
    fn summed_inner_ranges_and_elements() {
        let mut buf = CircularSummedBuffer::<f64>::new(10, false);
        for i in 0..27 {
            buf.push(i as f64);
        }
        // newest is 26, back pos 9 is 17
        assert!(approx_eq!(f64, buf.get(0), 26.0));
        assert!(approx_eq!(f64, buf.get(9), 17.0));
        assert!(approx_eq!(f64, buf.get_sum(2, 5), 24.0 + 23.0 + 22.0 + 21.0));
        assert!(approx_eq!(f64, buf.get_diff(3), 1.0));
        assert_eq!(buf.timestamp(), 26);
    }

    #[test]
    fn eviction_horizon() {
        let cap = 8;
        let mut buf = CircularSummedBuffer::<f64>::new(cap, false);
        for i in 0..(cap + 3) {
            buf.push(i as f64);
            assert!(buf.occupied() <= cap);
        }
        assert!(!buf.is_back_pos_occupied(cap));
        assert!(buf.is_still_in_buffer(3));
        assert!(!buf.is_still_in_buffer(2));
    }

    #[test]
    fn fill_with_rebuilds_prefix_sums() {
        let mut buf = CircularSummedBuffer::<f64>::new(6, false);
        buf.fill_with(0.5);
        assert_eq!(buf.occupied(), 6);
        assert!(approx_eq!(f64, buf.get_sum(0, 5), 3.0));
        buf.push(2.0);
        assert!(approx_eq!(f64, buf.get(0), 2.0));
        assert!(approx_eq!(f64, buf.get(1), 0.5));
        assert!(approx_eq!(f64, buf.get_average(0, 5), (2.0 + 5.0 * 0.5) / 6.0));
    }

    #[test]
    fn add_to_last_only_touches_newest() {
        let mut buf = CircularSummedBuffer::<f64>::new(4, false);
        buf.push(1.0);
        buf.push(2.0);
        buf.add_to_last(0.25);
        assert!(approx_eq!(f64, buf.get(0), 2.25));
        assert!(approx_eq!(f64, buf.get(1), 1.0));
        buf.push(3.0);
        assert!(approx_eq!(f64, buf.get_sum(0, 2), 6.25));
    }

    #[test]
    fn plain_buffer_push_pop_and_timestamps() {
        let mut buf = CircularBuffer::<f64>::new(3, false);
        assert!(buf.is_empty());
        for v in [1.0, 2.0, 3.0, 4.0] {
            buf.push(v);
        }
        assert_eq!(buf.occupied(), 3);
        assert_eq!(*buf.get(0), 4.0);
        assert_eq!(*buf.get(2), 2.0);
        assert_eq!(buf.back_pos_of(2), 1);
        assert_eq!(*buf.get_by_timestamp(1), 2.0);
        assert_eq!(buf.timestamp_of(2), 1);
        assert_eq!(buf.get_diff(0), 1.0);
        assert_eq!(buf.get_diff(2), 2.0);
        assert_eq!(buf.pop(), 4.0);
        assert_eq!(*buf.get(0), 3.0);
        assert_eq!(buf.timestamp(), 2);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![3.0, 2.0]);
    }

    #[test]
    fn plain_average_is_naive() {
        let mut buf = CircularBuffer::<f64>::new(5, false);
        buf.fill_with(1.0);
        buf.push(6.0);
        assert!(approx_eq!(f64, buf.get_average(0, 4), 2.0));
    }

    #[test]
    #[should_panic(expected = "occupied")]
    fn reading_past_occupied_panics() {
        let mut buf = CircularSummedBuffer::<f64>::new(4, false);
        buf.push(1.0);
        let _ = buf.get(1);
    }
}
