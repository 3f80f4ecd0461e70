//! Sensor-to-instrument glue.
//!
//! The `Conductor` owns the beat classifier and the instrument set, and shares the mixer
//! with the audio side. Each sensor feed turns into a [`ControlInput`] for the focused
//! instrument, and each detected beat into an `add_beat` on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};

use kinetic_core::prelude::*;
use kinetic_motion::prelude::{AccEngine, Vector3D};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::instrument::{ControlInput, Instrument, InstrumentHandle};
use crate::kinetic::INSTRUMENT_STOP_TIMEOUT;
use crate::mixer::SoundEngine;

/// Magnetometer Z to heading degrees.
const GEO_SCALE: f64 = 180.0;
/// Cross-talk of heading × tilt-around-X into the tilt-around-Y estimate.
const AROUND_Y_GEO_COUPLING: f64 = 0.0093;
/// Position window (back positions `0..=N`) for the tilt estimates.
const ORIENTATION_WINDOW: usize = 10;
const INPUT_VELOCITY_WINDOW: usize = 5;
const INPUT_POSITION_WINDOW: usize = 3;

/// Wrap an angle in degrees into `(-180, 180]`.
pub fn wrap_degrees(a: f64) -> f64 {
    let w = (a + 180.0).rem_euclid(360.0) - 180.0;
    if w == -180.0 { 180.0 } else { w }
}

fn lock(h: &InstrumentHandle) -> MutexGuard<'_, dyn Instrument + 'static> {
    h.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Conductor {
    acc: AccEngine,
    sound: Arc<SoundEngine>,
    instruments: Vec<InstrumentHandle>,
    current: Option<usize>,

    beat_pending: Arc<AtomicBool>,

    geo_angle: f64,
    geo_base_angle: f64,
    input: ControlInput,
    beats: u64,
}

impl Conductor {
    /// Registers a feed listener on `acc`; nothing is selected or playing yet.
    pub fn new(mut acc: AccEngine, sound: Arc<SoundEngine>, instruments: Vec<InstrumentHandle>) -> Self {
        let beat_pending = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&beat_pending);
        acc.add_acc_feed_listener(move |beat| {
            if beat {
                flag.store(true, Ordering::Release);
            }
        });
        info!("conductor: {} instruments", instruments.len());
        Self {
            acc,
            sound,
            instruments,
            current: None,
            beat_pending,
            geo_angle: 0.0,
            geo_base_angle: 0.0,
            input: ControlInput::default(),
            beats: 0,
        }
    }

    #[inline] pub fn acc_engine(&self) -> &AccEngine { &self.acc }
    #[inline] pub fn sound_engine(&self) -> &Arc<SoundEngine> { &self.sound }
    #[inline] pub fn instruments(&self) -> &[InstrumentHandle] { &self.instruments }
    #[inline] pub fn current_index(&self) -> Option<usize> { self.current }
    #[inline] pub fn control_input(&self) -> ControlInput { self.input }
    #[inline] pub fn beats_count(&self) -> u64 { self.beats }

    pub fn current_instrument(&self) -> Option<&InstrumentHandle> {
        self.current.map(|i| &self.instruments[i])
    }

    /// Heading relative to the orientation base, in `(-180, 180]`.
    pub fn geo_orientation_angle(&self) -> f64 {
        wrap_degrees(self.geo_angle - self.geo_base_angle)
    }

    /// Move focus to instrument `index`. The previous one fades out and is dropped from the
    /// mixer after the stop timeout; the new one is added unless it is still playing.
    pub fn select_instrument(&mut self, index: usize) -> Result<()> {
        if index >= self.instruments.len() {
            return Err(Error::InstrumentIndex(index));
        }
        if self.current == Some(index) {
            return Ok(());
        }

        if let Some(prev) = self.current.map(|i| Arc::clone(&self.instruments[i])) {
            lock(&prev).on_lose_focus();
            self.sound.stop_instrument_after(&prev, INSTRUMENT_STOP_TIMEOUT);
        }

        let next = Arc::clone(&self.instruments[index]);
        let name = {
            let mut guard = lock(&next);
            guard.on_gain_focus();
            guard.update_input(&self.input);
            guard.name().to_string()
        };
        self.sound.add_instrument(next, None);
        self.current = Some(index);
        info!("conductor: focus on `{name}`");
        Ok(())
    }

    /// Take the current heading as straight ahead and restart the motion history.
    pub fn reset_orientation(&mut self) {
        self.geo_base_angle = self.geo_angle;
        self.acc.reset_input();
        self.beat_pending.store(false, Ordering::Release);
        debug!("conductor: orientation reset, base {:.1}°", self.geo_base_angle);
    }

    /// Feed one sensor sample on the wall clock. Returns whether a beat was played.
    pub fn feed_acc(&mut self, acc: Vector3D, gyro: Vector3D, mag: Vector3D) -> bool {
        self.acc.feed_acc(acc, gyro, mag);
        self.on_acc_feed()
    }

    /// Feed one sensor sample at time `t`.
    pub fn feed_acc_at(&mut self, t: Time, acc: Vector3D, gyro: Vector3D, mag: Vector3D) -> bool {
        self.acc.feed_acc_at(t, acc, gyro, mag);
        self.on_acc_feed()
    }

    /// Control-rate housekeeping: advance instrument stop timeouts.
    pub fn tick(&self, dt: Time) {
        self.sound.tick(dt);
    }

    fn on_acc_feed(&mut self) -> bool {
        let beat = self.beat_pending.swap(false, Ordering::AcqRel);
        self.input = self.derive_input();

        let Some(current) = self.current_instrument() else {
            return false;
        };
        let mut instrument = lock(current);
        instrument.update_input(&self.input);
        if !beat {
            return false;
        }

        let amplitude = self.acc.acc_beat_amplitude();
        let norm_freq = self.acc.acc_beat_frequency();
        debug!("conductor: beat f={norm_freq:.3} a={amplitude:.2} on `{}`", instrument.name());
        instrument.add_beat(norm_freq, amplitude);
        drop(instrument);
        self.beats += 1;
        true
    }

    fn derive_input(&mut self) -> ControlInput {
        let trajectory = self.acc.acc_trajectory();
        let mag = self.acc.mag_trajectory().positions().get(0);
        let pos = trajectory.positions().get_average(0, ORIENTATION_WINDOW);

        self.geo_angle = mag.z * GEO_SCALE;
        let around_x = point_to_deg(-pos.z, -pos.y);
        let flip = if mag.y >= 1.0 { -1.0 } else { 1.0 };
        let around_y = flip * mag.y * GEO_SCALE - AROUND_Y_GEO_COUPLING * self.geo_angle * around_x;

        ControlInput {
            geo_angle: self.geo_orientation_angle(),
            around_x,
            around_y,
            acc_velocity: trajectory.velocities().get_average(0, INPUT_VELOCITY_WINDOW),
            acc_position: trajectory.positions().get_average(0, INPUT_POSITION_WINDOW),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::handle;
    use float_cmp::approx_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const DT: Time = 0.01;

    #[derive(Default)]
    struct Probe {
        beats: Arc<Mutex<Vec<(f64, f64)>>>,
        inputs: Arc<AtomicUsize>,
        focused: Arc<AtomicBool>,
        last_input: Arc<Mutex<ControlInput>>,
    }

    impl Instrument for Probe {
        fn name(&self) -> &str { "probe" }
        fn generate_sample(&mut self) -> StereoSample { StereoSample::default() }
        fn add_beat(&mut self, norm_freq: f64, volume: Volume) {
            self.beats.lock().expect("probe lock").push((norm_freq, volume));
        }
        fn update_input(&mut self, input: &ControlInput) {
            self.inputs.fetch_add(1, Ordering::Relaxed);
            *self.last_input.lock().expect("probe lock") = *input;
        }
        fn on_gain_focus(&mut self) { self.focused.store(true, Ordering::Relaxed); }
        fn on_lose_focus(&mut self) { self.focused.store(false, Ordering::Relaxed); }
    }

    struct Rig {
        conductor: Conductor,
        t: Time,
    }

    impl Rig {
        fn new(instruments: Vec<InstrumentHandle>) -> Self {
            let sound = Arc::new(SoundEngine::new(DEFAULT_SAMPLE_RATE));
            Self { conductor: Conductor::new(AccEngine::default(), sound, instruments), t: 3.0 }
        }

        fn feed(&mut self, zs: &[f64], mag: Vector3D) -> usize {
            let mut played = 0;
            for &z in zs {
                self.t += DT;
                let acc = Vector3D::new(0.0, 0.0, z);
                let gyro = Vector3D::new(1.0, 0.0, 0.0);
                played += usize::from(self.conductor.feed_acc_at(self.t, acc, gyro, mag));
            }
            played
        }

        /// Rest, wind up, swing down, rebound: one beat of amplitude 1.5.
        fn swing(&mut self) -> usize {
            let ramp = |from: f64, step: f64| (1..=5).map(move |i| from + step * i as f64);
            let zs: Vec<f64> = [0.0; 3]
                .into_iter()
                .chain(ramp(0.0, 0.1))
                .chain(ramp(0.5, -0.3))
                .chain(ramp(-1.0, 0.3))
                .collect();
            self.feed(&zs, Vector3D::zeros())
        }
    }

    fn probes(n: usize) -> (Vec<Probe>, Vec<InstrumentHandle>) {
        let probes: Vec<Probe> = (0..n).map(|_| Probe::default()).collect();
        let handles = probes
            .iter()
            .map(|p| {
                handle(Probe {
                    beats: Arc::clone(&p.beats),
                    inputs: Arc::clone(&p.inputs),
                    focused: Arc::clone(&p.focused),
                    last_input: Arc::clone(&p.last_input),
                })
            })
            .collect();
        (probes, handles)
    }

    #[test]
    fn beats_reach_the_focused_instrument() {
        let (probes, handles) = probes(2);
        let mut rig = Rig::new(handles);
        rig.conductor.select_instrument(1).expect("valid index");

        assert_eq!(rig.swing(), 1);
        assert_eq!(rig.conductor.beats_count(), 1);
        assert!(probes[0].beats.lock().expect("lock").is_empty());

        let beats = probes[1].beats.lock().expect("lock").clone();
        assert_eq!(beats.len(), 1);
        assert!(approx_eq!(f64, beats[0].0, 20.0 / 140.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, beats[0].1, 1.5, epsilon = 1e-9));
        // one update per feed, plus the one on focus
        assert_eq!(probes[1].inputs.load(Ordering::Relaxed), 19);
    }

    #[test]
    fn nothing_selected_plays_nothing() {
        let (probes, handles) = probes(1);
        let mut rig = Rig::new(handles);
        assert_eq!(rig.swing(), 0);
        assert!(probes[0].beats.lock().expect("lock").is_empty());
        assert!(rig.conductor.acc_engine().has_beat());
    }

    #[test]
    fn switching_fades_the_old_instrument_out_of_the_mixer() {
        let (probes, handles) = probes(2);
        let mut rig = Rig::new(handles.clone());
        rig.conductor.select_instrument(0).expect("valid index");
        rig.conductor.select_instrument(1).expect("valid index");

        assert!(!probes[0].focused.load(Ordering::Relaxed));
        assert!(probes[1].focused.load(Ordering::Relaxed));
        let sound = Arc::clone(rig.conductor.sound_engine());
        assert!(sound.is_playing_instrument(&handles[0]));

        rig.conductor.tick(INSTRUMENT_STOP_TIMEOUT - 0.5);
        assert!(sound.is_playing_instrument(&handles[0]));
        rig.conductor.tick(1.0);
        assert!(!sound.is_playing_instrument(&handles[0]));
        assert!(sound.is_playing_instrument(&handles[1]));
    }

    #[test]
    fn switching_back_before_the_timeout_keeps_it() {
        let (_probes, handles) = probes(2);
        let mut rig = Rig::new(handles.clone());
        rig.conductor.select_instrument(0).expect("valid index");
        rig.conductor.select_instrument(1).expect("valid index");
        rig.conductor.select_instrument(0).expect("valid index");
        rig.conductor.tick(10.0);

        let sound = rig.conductor.sound_engine();
        assert!(sound.is_playing_instrument(&handles[0]));
        assert!(!sound.is_playing_instrument(&handles[1]));
    }

    #[test]
    fn bad_index_is_an_error() {
        let (_probes, handles) = probes(1);
        let mut rig = Rig::new(handles);
        assert!(matches!(rig.conductor.select_instrument(3), Err(Error::InstrumentIndex(3))));
        assert_eq!(rig.conductor.current_index(), None);
    }

    #[test]
    fn heading_is_relative_to_the_reset_base() {
        let (probes, handles) = probes(1);
        let mut rig = Rig::new(handles);
        rig.conductor.select_instrument(0).expect("valid index");

        rig.feed(&[0.0], Vector3D::new(0.0, 0.0, 0.5));
        assert!(approx_eq!(f64, rig.conductor.control_input().geo_angle, 90.0));

        rig.conductor.reset_orientation();
        rig.feed(&[0.0], Vector3D::new(0.0, 0.0, 0.75));
        assert!(approx_eq!(f64, rig.conductor.geo_orientation_angle(), 45.0));
        assert!(approx_eq!(f64, probes[0].last_input.lock().expect("lock").geo_angle, 45.0));
    }

    #[test]
    fn tilt_around_y_follows_the_magnetometer() {
        let (_probes, handles) = probes(1);
        let mut rig = Rig::new(handles);
        rig.feed(&[0.0], Vector3D::new(0.0, 0.25, 0.0));
        assert!(approx_eq!(f64, rig.conductor.control_input().around_y, 45.0));
        rig.feed(&[0.0], Vector3D::new(0.0, 1.0, 0.0));
        assert!(approx_eq!(f64, rig.conductor.control_input().around_y, -180.0));
    }

    #[test]
    fn wrap_keeps_headings_in_range() {
        assert_eq!(wrap_degrees(190.0), -170.0);
        assert_eq!(wrap_degrees(-190.0), 170.0);
        assert_eq!(wrap_degrees(180.0), 180.0);
        assert_eq!(wrap_degrees(-180.0), 180.0);
        assert_eq!(wrap_degrees(45.0), 45.0);
    }
}
