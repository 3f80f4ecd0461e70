//! Output mixer.
//!
//! `SoundEngine` sums every active instrument once per sample, optionally runs the sum
//! through a stereo echo, then through the lookahead compressor, and writes `f32` frames.
//! It is shared between the audio callback (`generate_*`) and the control side
//! (instrument add/remove, stop timeouts); a mutex guards the instrument list.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kinetic_core::prelude::*;
use log::{debug, info};

use crate::instrument::InstrumentHandle;

pub const OUTPUT_CHANNELS: usize = 2;
/// Length of the echo line; normalized echo delays map onto `[MIN, MAX]_ECHO_DELAY`.
pub const DELAYS_BUFFER_LEN: Time = 3.0;
pub const MIN_ECHO_DELAY: Time = 0.0;
pub const MAX_ECHO_DELAY: Time = 1.0;
/// A mixed sample beyond this means an instrument ran away. Each voice is held under 10
/// on its own; the mix stacks every playing voice plus the echo on top.
pub const MAX_MIX_LEVEL: Sample = 100.0;

const ECHO_START: Time = 0.10;
const ECHO_VOLUME: Volume = 1.5 / 8.0;
const ECHO_FEEDBACK: Volume = 1.0 / 8.0;
/// `(delay after ECHO_START, volume factor, feedback factor, averaged samples)`
const ECHO_PRESET: [(Time, f64, f64, BackPos); 8] = [
    (0.00, 1.0, 0.90, 170),
    (0.12, 1.0, 1.03, 800),
    (0.24, 1.0, 1.07, 1200),
    (0.26, 0.5, 0.90, 50),
    (0.36, 0.9, 1.10, 1500),
    (0.48, 0.8, 1.13, 3500),
    (0.50, 0.7, 0.90, 190),
    (0.60, 0.6, 1.19, 7000),
];

struct Mixer {
    instruments: Vec<InstrumentHandle>,
    stopping: Vec<(InstrumentHandle, Time)>,
    delays: Option<Delays>,
    compressor: Option<Compressor>,
    gain: Volume,
    samples_counter: u64,
}

impl Mixer {
    fn position(&self, instrument: &InstrumentHandle) -> Option<usize> {
        self.instruments.iter().position(|i| Arc::ptr_eq(i, instrument))
    }

    fn next_frame(&mut self) -> StereoSample {
        let mut out = StereoSample::default();
        for instrument in &self.instruments {
            out += lock(instrument).generate_sample();
        }
        if let Some(delays) = self.delays.as_mut() {
            out += delays.update_stereo(out);
        }
        assert!(
            out.left.abs() <= MAX_MIX_LEVEL && out.right.abs() <= MAX_MIX_LEVEL,
            "mixed sample {out:?} out of range"
        );
        out *= self.gain;
        if let Some(compressor) = self.compressor.as_mut() {
            out = compressor.update_stereo(out);
        }
        self.samples_counter += 1;
        out
    }
}

/// A poisoned lock only means another thread panicked mid-sample; the data is still usable.
fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SoundEngine {
    sample_rate: Frequency,
    mixer: Mutex<Mixer>,
}

impl SoundEngine {
    /// Compressor on, echo off.
    pub fn new(sample_rate: Frequency) -> Self {
        info!("sound engine: {sample_rate} Hz, {OUTPUT_CHANNELS} channels");
        Self {
            sample_rate,
            mixer: Mutex::new(Mixer {
                instruments: Vec::new(),
                stopping: Vec::new(),
                delays: None,
                compressor: Some(Compressor::new(OUTPUT_CHANNELS, sample_rate)),
                gain: 1.0,
                samples_counter: 0,
            }),
        }
    }

    /// Builder form of [`add_echo_preset`](Self::add_echo_preset).
    pub fn with_echo_preset(self) -> Self {
        self.add_echo_preset();
        self
    }

    /// Add the eight-tap ambient echo.
    pub fn add_echo_preset(&self) {
        for (delay, volume, feedback, average) in ECHO_PRESET {
            self.add_echo(ECHO_START + delay, ECHO_VOLUME * volume, ECHO_FEEDBACK * feedback, average);
        }
    }

    #[inline] pub fn sample_rate(&self) -> Frequency { self.sample_rate }

    pub fn set_compressor(&self, enabled: bool) {
        let mut mixer = lock(&self.mixer);
        mixer.compressor = enabled.then(|| Compressor::new(OUTPUT_CHANNELS, self.sample_rate));
    }

    /// Linear gain applied before the compressor.
    pub fn set_gain(&self, gain: Volume) {
        lock(&self.mixer).gain = gain.max(0.0);
    }

    /// Add an echo tap. `normalized_delay` in [0, 1] spans the echo delay range; negative
    /// delays and volumes are clamped to 0. Enables the echo line on first use.
    pub fn add_echo(&self, normalized_delay: Time, volume: Volume, feedback: Volume, take_average: BackPos) {
        let delay = MIN_ECHO_DELAY + (MAX_ECHO_DELAY - MIN_ECHO_DELAY) * normalized_delay.max(0.0);
        let mut mixer = lock(&self.mixer);
        mixer
            .delays
            .get_or_insert_with(|| Delays::new(OUTPUT_CHANNELS, DELAYS_BUFFER_LEN, self.sample_rate))
            .add_delay(delay, volume.max(0.0), feedback, take_average);
    }

    /// Start mixing `instrument`, in front of `before` when that one is playing. Adding an
    /// instrument that is waiting out its stop timeout cancels the stop.
    pub fn add_instrument(&self, instrument: InstrumentHandle, before: Option<&InstrumentHandle>) {
        let mut mixer = lock(&self.mixer);
        mixer.stopping.retain(|(i, _)| !Arc::ptr_eq(i, &instrument));
        if mixer.position(&instrument).is_some() {
            debug!("mixer: instrument already playing");
            return;
        }
        let name = lock(&instrument).name().to_string();
        match before.and_then(|b| mixer.position(b)) {
            Some(at) => mixer.instruments.insert(at, instrument),
            None => mixer.instruments.push(instrument),
        }
        info!("mixer: added `{name}` ({} playing)", mixer.instruments.len());
    }

    pub fn remove_instrument(&self, instrument: &InstrumentHandle) -> bool {
        let mut mixer = lock(&self.mixer);
        mixer.stopping.retain(|(i, _)| !Arc::ptr_eq(i, instrument));
        let Some(at) = mixer.position(instrument) else {
            return false;
        };
        mixer.instruments.remove(at);
        info!("mixer: removed `{}` ({} playing)", lock(instrument).name(), mixer.instruments.len());
        true
    }

    pub fn is_playing_instrument(&self, instrument: &InstrumentHandle) -> bool {
        lock(&self.mixer).position(instrument).is_some()
    }

    pub fn instruments_num(&self) -> usize {
        lock(&self.mixer).instruments.len()
    }

    /// Keep mixing `instrument` for `timeout` seconds of [`tick`](Self::tick), then drop it.
    pub fn stop_instrument_after(&self, instrument: &InstrumentHandle, timeout: Time) {
        let mut mixer = lock(&self.mixer);
        if mixer.position(instrument).is_none() {
            return;
        }
        match mixer.stopping.iter_mut().find(|(i, _)| Arc::ptr_eq(i, instrument)) {
            Some((_, left)) => *left = timeout,
            None => mixer.stopping.push((Arc::clone(instrument), timeout)),
        }
    }

    /// Advance stop timeouts by `dt` seconds, removing the instruments that ran out.
    pub fn tick(&self, dt: Time) {
        let expired: Vec<InstrumentHandle> = {
            let mut mixer = lock(&self.mixer);
            mixer.stopping.iter_mut().for_each(|(_, left)| *left -= dt);
            let (expired, waiting): (Vec<_>, Vec<_>) = mixer.stopping.drain(..).partition(|(_, left)| *left <= 0.0);
            mixer.stopping = waiting;
            expired.into_iter().map(|(i, _)| i).collect()
        };
        for instrument in &expired {
            self.remove_instrument(instrument);
        }
    }

    /// Frames rendered since construction.
    pub fn samples_counter(&self) -> u64 {
        lock(&self.mixer).samples_counter
    }

    /// Render into `left` and `right` (planar), or into `left` alone as interleaved L/R when
    /// `right` is `None`.
    pub fn generate_slice(&self, left: &mut [f32], right: Option<&mut [f32]>) {
        match right {
            Some(right) => {
                assert_eq!(left.len(), right.len(), "planar buffers differ in length");
                let mut mixer = lock(&self.mixer);
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let frame = mixer.next_frame();
                    *l = frame.left as f32;
                    *r = frame.right as f32;
                }
            }
            None => self.generate_interleaved(left),
        }
    }

    /// Render interleaved stereo frames; a trailing odd value is zeroed.
    pub fn generate_interleaved(&self, out: &mut [f32]) {
        let mut mixer = lock(&self.mixer);
        let mut frames = out.chunks_exact_mut(OUTPUT_CHANNELS);
        for frame in frames.by_ref() {
            let s = mixer.next_frame();
            frame[0] = s.left as f32;
            frame[1] = s.right as f32;
        }
        frames.into_remainder().fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{handle, Instrument};
    use float_cmp::approx_eq;
    use more_asserts::{assert_gt, assert_le};

    struct Ramp {
        x: f64,
        step: f64,
    }

    impl Instrument for Ramp {
        fn name(&self) -> &str { "ramp" }
        fn generate_sample(&mut self) -> StereoSample {
            self.x += self.step;
            StereoSample::new(self.x, -self.x * 0.5)
        }
    }

    fn ramp(step: f64) -> InstrumentHandle {
        handle(Ramp { x: 0.0, step })
    }

    fn dry_engine() -> SoundEngine {
        let e = SoundEngine::new(DEFAULT_SAMPLE_RATE);
        e.set_compressor(false);
        e
    }

    #[test]
    fn output_is_the_sum_of_instruments() {
        let e = dry_engine();
        e.add_instrument(ramp(0.001), None);
        e.add_instrument(ramp(0.002), None);

        let mut l = [0.0_f32; 64];
        let mut r = [0.0_f32; 64];
        e.generate_slice(&mut l, Some(&mut r));

        let mut a = Ramp { x: 0.0, step: 0.001 };
        let mut b = Ramp { x: 0.0, step: 0.002 };
        for i in 0..64 {
            let want = a.generate_sample() + b.generate_sample();
            assert!(approx_eq!(f32, l[i], want.left as f32, epsilon = 1e-6));
            assert!(approx_eq!(f32, r[i], want.right as f32, epsilon = 1e-6));
        }
        assert_eq!(e.samples_counter(), 64);
    }

    #[test]
    fn interleaved_matches_planar() {
        let planar = dry_engine();
        planar.add_instrument(ramp(0.01), None);
        let interleaved = dry_engine();
        interleaved.add_instrument(ramp(0.01), None);

        let (mut l, mut r) = ([0.0_f32; 16], [0.0_f32; 16]);
        planar.generate_slice(&mut l, Some(&mut r));
        let mut lr = [0.0_f32; 32];
        interleaved.generate_slice(&mut lr, None);

        for i in 0..16 {
            assert_eq!(lr[2 * i], l[i]);
            assert_eq!(lr[2 * i + 1], r[i]);
        }
    }

    #[test]
    fn add_before_and_remove_by_identity() {
        let e = dry_engine();
        let (a, b, c) = (ramp(0.1), ramp(0.1), ramp(0.1));
        e.add_instrument(Arc::clone(&a), None);
        e.add_instrument(Arc::clone(&b), None);
        e.add_instrument(Arc::clone(&c), Some(&b));
        e.add_instrument(Arc::clone(&a), None);

        let order = {
            let mixer = lock(&e.mixer);
            mixer.instruments.iter().map(|i| [&a, &b, &c].iter().position(|h| Arc::ptr_eq(h, i))).collect::<Vec<_>>()
        };
        assert_eq!(order, [Some(0), Some(2), Some(1)]);

        assert!(e.remove_instrument(&c));
        assert!(!e.remove_instrument(&c));
        assert!(!e.is_playing_instrument(&c));
        assert!(e.is_playing_instrument(&a));
    }

    #[test]
    fn stop_timeout_removes_after_it_elapses() {
        let e = dry_engine();
        let a = ramp(0.0);
        e.add_instrument(Arc::clone(&a), None);
        e.stop_instrument_after(&a, 3.0);
        e.tick(1.0);
        e.tick(1.5);
        assert!(e.is_playing_instrument(&a));
        e.tick(0.6);
        assert!(!e.is_playing_instrument(&a));
    }

    #[test]
    fn re_adding_cancels_a_pending_stop() {
        let e = dry_engine();
        let a = ramp(0.0);
        e.add_instrument(Arc::clone(&a), None);
        e.stop_instrument_after(&a, 1.0);
        e.add_instrument(Arc::clone(&a), None);
        e.tick(5.0);
        assert!(e.is_playing_instrument(&a));
        assert_eq!(e.instruments_num(), 1);
    }

    #[test]
    fn compressor_keeps_loud_mixes_under_the_ceiling() {
        let e = SoundEngine::new(DEFAULT_SAMPLE_RATE);
        e.add_instrument(handle(Ramp { x: 3.0, step: 0.0 }), None);
        let mut out = vec![0.0_f32; 2 * 4000];
        e.generate_interleaved(&mut out);
        let peak = out.iter().fold(0.0_f32, |m, x| m.max(x.abs()));
        assert_le!(peak as f64, Compressor::MAX_OUTPUT_LEVEL + 1e-4);
    }

    #[test]
    fn echo_preset_repeats_an_impulse() {
        struct Click(bool);
        impl Instrument for Click {
            fn name(&self) -> &str { "click" }
            fn generate_sample(&mut self) -> StereoSample {
                StereoSample::mono(if std::mem::replace(&mut self.0, false) { 1.0 } else { 0.0 })
            }
        }

        let e = SoundEngine::new(DEFAULT_SAMPLE_RATE).with_echo_preset();
        e.set_compressor(false);
        e.add_instrument(handle(Click(true)), None);
        let mut out = vec![0.0_f32; 2 * DEFAULT_SAMPLE_RATE as usize];
        e.generate_interleaved(&mut out);

        let first_echo = (0.1 * DEFAULT_SAMPLE_RATE) as usize;
        let tail = out[2 * (first_echo - 10)..].iter().fold(0.0_f32, |m, x| m.max(x.abs()));
        assert_gt!(tail, 0.0);
        assert_eq!(out[2 * 10], 0.0);
    }

    #[test]
    fn focus_switches_while_rendering() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let e = Arc::new(SoundEngine::new(DEFAULT_SAMPLE_RATE));
        let done = Arc::new(AtomicBool::new(false));
        let renderer = {
            let (e, done) = (Arc::clone(&e), Arc::clone(&done));
            thread::spawn(move || {
                let mut out = vec![0.0_f32; 2 * 256];
                let mut blocks = 0_u64;
                while !done.load(Ordering::Acquire) {
                    e.generate_interleaved(&mut out);
                    assert!(out.iter().all(|x| x.is_finite()));
                    blocks += 1;
                }
                blocks
            })
        };

        let voices = [handle(Ramp { x: 0.2, step: 0.0 }), handle(Ramp { x: 0.3, step: 0.0 })];
        let mut current = 0;
        e.add_instrument(Arc::clone(&voices[current]), None);
        for _ in 0..200 {
            let next = 1 - current;
            e.stop_instrument_after(&voices[current], 0.05);
            e.add_instrument(Arc::clone(&voices[next]), None);
            current = next;
            e.tick(0.01);
            thread::yield_now();
        }
        let previous = &voices[1 - current];
        assert!(e.is_playing_instrument(previous));
        e.tick(0.05);
        assert!(!e.is_playing_instrument(previous));
        assert!(e.is_playing_instrument(&voices[current]));
        assert_eq!(e.instruments_num(), 1);

        while e.samples_counter() == 0 {
            thread::yield_now();
        }
        done.store(true, Ordering::Release);
        let blocks = renderer.join().expect("renderer thread");
        assert_gt!(blocks, 0);
    }

    #[test]
    fn loud_voices_stack_within_the_mix_bound() {
        let e = dry_engine();
        for _ in 0..3 {
            e.add_instrument(handle(Ramp { x: 9.0, step: 0.0 }), None);
        }
        let mut out = vec![0.0_f32; 2 * 4000];
        e.generate_interleaved(&mut out);
        assert!(approx_eq!(f32, out[0], 27.0, epsilon = 1e-4));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn runaway_mix_is_fatal() {
        let e = dry_engine();
        e.add_instrument(handle(Ramp { x: MAX_MIX_LEVEL + 1.0, step: 0.0 }), None);
        let mut out = [0.0_f32; 2];
        e.generate_interleaved(&mut out);
    }

    #[test]
    fn odd_interleaved_tail_is_zeroed() {
        let e = dry_engine();
        e.add_instrument(ramp(0.5), None);
        let mut out = [9.0_f32; 5];
        e.generate_interleaved(&mut out);
        assert_eq!(out[4], 0.0);
        assert_eq!(e.samples_counter(), 2);
    }
}
