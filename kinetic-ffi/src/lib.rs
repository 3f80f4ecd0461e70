//! C ABI wrapper for the kinetic motion instruments.
//!
//! A host app owns the sensors and the audio device. It feeds accelerometer, gyroscope and
//! magnetometer samples in and pulls rendered `f32` audio out.
//!
//! ABI notes
//! - All functions are `extern "C"` and `#[no_mangle]`.
//! - Opaque handle type: `KineticEngine` (heap-allocated; you own/delete it).
//! - Status-returning functions give `0` (or a count) on success and `-1` on bad arguments.
//! - Instruments are indexed `0 = keys`, `1 = drone`, `2 = drums`.
//!
//! Threading
//! - Calls on one handle must not overlap. Hosts feeding from a sensor thread and rendering
//!   on the audio thread serialize the two themselves.

use std::slice;
use std::sync::Arc;

use kinetic_engine::prelude::*;
use kinetic_motion::prelude::{AccEngine, Vector3D};
use log::{error, warn};
use strum::IntoEnumIterator;

/// Opaque engine handle we hand to C.
pub struct KineticEngine {
    conductor: Conductor,
    sound: Arc<SoundEngine>,
}

impl KineticEngine {
    fn new(sample_rate: f64) -> Result<Self> {
        let sound = Arc::new(SoundEngine::new(sample_rate));
        let instruments = InstrumentKind::iter()
            .map(|kind| kind.build(sample_rate))
            .collect::<Result<Vec<_>>>()?;
        let mut conductor = Conductor::new(AccEngine::default(), Arc::clone(&sound), instruments);
        conductor.select_instrument(0)?;
        Ok(Self { conductor, sound })
    }
}

fn engine_ref<'a>(engine: *const KineticEngine) -> Option<&'a KineticEngine> {
    // SAFETY: non-null handles come from `kinetic_create` and are not yet destroyed.
    unsafe { engine.as_ref() }
}

fn engine_mut<'a>(engine: *mut KineticEngine) -> Option<&'a mut KineticEngine> {
    // SAFETY: as above; the caller does not overlap calls on one handle.
    unsafe { engine.as_mut() }
}

// --- Creation / destruction -------------------------------------------------------

/// Create an engine rendering at `sample_rate` with keys in focus.
/// Returns null when the rate is not a positive finite number.
#[no_mangle]
pub extern "C" fn kinetic_create(sample_rate: f64) -> *mut KineticEngine {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        warn!("kinetic_create: invalid sample rate {sample_rate}");
        return std::ptr::null_mut();
    }
    match KineticEngine::new(sample_rate) {
        Ok(e) => Box::into_raw(Box::new(e)),
        Err(e) => {
            error!("kinetic_create: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Destroy an engine previously returned by `kinetic_create`. Null is ignored.
#[no_mangle]
pub extern "C" fn kinetic_destroy(engine: *mut KineticEngine) {
    if !engine.is_null() {
        // SAFETY: the pointer came from `Box::into_raw` in `kinetic_create`.
        unsafe { drop(Box::from_raw(engine)) };
    }
}

// --- Sensor input ------------------------------------------------------------------

/// Feed one sensor sample stamped with the engine's own clock.
/// Returns 1 when the sample completed a beat, 0 otherwise, -1 on a null handle.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn kinetic_feed_acc(
    engine: *mut KineticEngine,
    acc_x: f64, acc_y: f64, acc_z: f64,
    gyro_x: f64, gyro_y: f64, gyro_z: f64,
    mag_x: f64, mag_y: f64, mag_z: f64,
) -> i32 {
    let Some(e) = engine_mut(engine) else { return -1 };
    let beat = e.conductor.feed_acc(
        Vector3D::new(acc_x, acc_y, acc_z),
        Vector3D::new(gyro_x, gyro_y, gyro_z),
        Vector3D::new(mag_x, mag_y, mag_z),
    );
    i32::from(beat)
}

/// Same as `kinetic_feed_acc` with an explicit timestamp `t` in seconds.
/// Timestamps start after 3.0. Returns -1 on a null handle or on a timestamp
/// that is not finite or earlier than the previous feed.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn kinetic_feed_acc_at(
    engine: *mut KineticEngine,
    t: f64,
    acc_x: f64, acc_y: f64, acc_z: f64,
    gyro_x: f64, gyro_y: f64, gyro_z: f64,
    mag_x: f64, mag_y: f64, mag_z: f64,
) -> i32 {
    let Some(e) = engine_mut(engine) else { return -1 };
    if !(t.is_finite() && t >= e.conductor.acc_engine().current_feed_timestamp()) {
        warn!("kinetic_feed_acc_at: timestamp {t} out of order");
        return -1;
    }
    let beat = e.conductor.feed_acc_at(
        t,
        Vector3D::new(acc_x, acc_y, acc_z),
        Vector3D::new(gyro_x, gyro_y, gyro_z),
        Vector3D::new(mag_x, mag_y, mag_z),
    );
    i32::from(beat)
}

/// Advance instrument stop timers by `dt` seconds. Call it at the feed rate.
#[no_mangle]
pub extern "C" fn kinetic_tick(engine: *mut KineticEngine, dt: f64) {
    if let Some(e) = engine_ref(engine) {
        e.conductor.tick(dt.max(0.0));
    }
}

/// Take the current heading as the new zero and restart motion analysis.
#[no_mangle]
pub extern "C" fn kinetic_reset_orientation(engine: *mut KineticEngine) {
    if let Some(e) = engine_mut(engine) {
        e.conductor.reset_orientation();
    }
}

// --- Beat accessors ----------------------------------------------------------------

/// 1 once any beat has been detected, 0 before that, -1 on a null handle.
#[no_mangle]
pub extern "C" fn kinetic_has_beat(engine: *const KineticEngine) -> i32 {
    engine_ref(engine).map_or(-1, |e| i32::from(e.conductor.acc_engine().has_beat()))
}

/// Amplitude of the last beat, 0.0 before the first one.
#[no_mangle]
pub extern "C" fn kinetic_beat_amplitude(engine: *const KineticEngine) -> f64 {
    match engine_ref(engine) {
        Some(e) if e.conductor.acc_engine().has_beat() => e.conductor.acc_engine().acc_beat_amplitude(),
        _ => 0.0,
    }
}

/// Normalized frequency (0..1) of the last beat, 0.0 before the first one.
#[no_mangle]
pub extern "C" fn kinetic_beat_frequency(engine: *const KineticEngine) -> f64 {
    match engine_ref(engine) {
        Some(e) if e.conductor.acc_engine().has_beat() => e.conductor.acc_engine().acc_beat_frequency(),
        _ => 0.0,
    }
}

/// Beats delivered to instruments since creation.
#[no_mangle]
pub extern "C" fn kinetic_beats_count(engine: *const KineticEngine) -> u64 {
    engine_ref(engine).map_or(0, |e| e.conductor.beats_count())
}

// --- Instruments -------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn kinetic_instruments_count(engine: *const KineticEngine) -> i32 {
    engine_ref(engine).map_or(-1, |e| e.conductor.instruments().len() as i32)
}

/// Index of the instrument in focus, -1 when none (or on a null handle).
#[no_mangle]
pub extern "C" fn kinetic_current_instrument(engine: *const KineticEngine) -> i32 {
    engine_ref(engine)
        .and_then(|e| e.conductor.current_index())
        .map_or(-1, |i| i as i32)
}

/// Move focus to `index`. The previous instrument fades out on its own.
/// Returns 0 on success, -1 on a null handle or an index out of range.
#[no_mangle]
pub extern "C" fn kinetic_select_instrument(engine: *mut KineticEngine, index: u32) -> i32 {
    let Some(e) = engine_mut(engine) else { return -1 };
    match e.conductor.select_instrument(index as usize) {
        Ok(()) => 0,
        Err(err) => {
            warn!("kinetic_select_instrument: {err}");
            -1
        }
    }
}

// --- Mixer parameters --------------------------------------------------------------

/// Output gain before the compressor. Negative or non-finite values fall back to 1.0.
#[no_mangle]
pub extern "C" fn kinetic_set_gain(engine: *mut KineticEngine, gain: f64) {
    if let Some(e) = engine_ref(engine) {
        e.sound.set_gain(if gain.is_finite() && gain >= 0.0 { gain } else { 1.0 });
    }
}

/// Add the ambient echo preset. Adding it twice stacks the taps.
#[no_mangle]
pub extern "C" fn kinetic_add_echo_preset(engine: *mut KineticEngine) {
    if let Some(e) = engine_ref(engine) {
        e.sound.add_echo_preset();
    }
}

#[no_mangle]
pub extern "C" fn kinetic_set_compressor(engine: *mut KineticEngine, enabled: i32) {
    if let Some(e) = engine_ref(engine) {
        e.sound.set_compressor(enabled != 0);
    }
}

// --- Rendering ---------------------------------------------------------------------

/// Render `frames` stereo frames into `out` (`2 * frames` floats, L R L R ...).
/// Returns the number of frames rendered (0 on error).
#[no_mangle]
pub extern "C" fn kinetic_generate_interleaved(engine: *mut KineticEngine, out: *mut f32, frames: u32) -> u32 {
    let Some(e) = engine_ref(engine) else { return 0 };
    if out.is_null() || frames == 0 {
        return 0;
    }
    // SAFETY: the caller provides room for `2 * frames` floats at `out`.
    let out = unsafe { slice::from_raw_parts_mut(out, frames as usize * 2) };
    e.sound.generate_interleaved(out);
    frames
}

/// Render `frames` frames into separate channel buffers, `frames` floats each. With `right`
/// null, `left` receives interleaved L/R and must hold `2 * frames` floats.
/// Returns the number of frames rendered (0 on error).
#[no_mangle]
pub extern "C" fn kinetic_generate_slice(
    engine: *mut KineticEngine,
    left: *mut f32,
    right: *mut f32,
    frames: u32,
) -> u32 {
    let Some(e) = engine_ref(engine) else { return 0 };
    if left.is_null() || frames == 0 || std::ptr::eq(left, right) {
        return 0;
    }
    let n = frames as usize;
    if right.is_null() {
        // SAFETY: the caller provides room for `2 * frames` floats at `left`.
        let out = unsafe { slice::from_raw_parts_mut(left, n * 2) };
        e.sound.generate_slice(out, None);
    } else {
        // SAFETY: both buffers hold `frames` floats and do not overlap.
        let (left, right) = unsafe { (slice::from_raw_parts_mut(left, n), slice::from_raw_parts_mut(right, n)) };
        e.sound.generate_slice(left, Some(right));
    }
    frames
}
