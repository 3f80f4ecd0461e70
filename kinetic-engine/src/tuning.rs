//! Per-partial tuning tables.
//!
//! The built-in tables are the voices' factory sound. They are plain data, so a JSON file
//! with the same shape can replace them for experimentation:
//!
//! ```json
//! [ { "wave": "pulse", "multiplier": 1.0, "left": 0.8, "right": 0.08, "pulse_width": 0.25 } ]
//! ```
//!
//! Omitted fields take [`PartialTuning::default`].

use std::fs;
use std::path::Path;

use kinetic_core::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Slow amplitude swell used by the drone.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerLfoTuning {
    pub frequency: Frequency,
    /// Degrees.
    pub phase: f64,
    pub volume: Volume,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialTuning {
    pub wave: WaveType,
    /// Overtone ratio against the voice's fundamental.
    pub multiplier: f64,
    pub left: Volume,
    pub right: Volume,
    /// Start phase in degrees; likewise for the LFO phases below.
    pub phase: f64,
    pub tremolo_volume: Volume,
    pub tremolo_phase: f64,
    /// Vibrato depth in Hz.
    pub vibrato_size: Frequency,
    pub vibrato_phase: f64,
    /// Lag of the frequency follower, 0 = none.
    pub freq_half_step: f64,
    /// Rate shared by tremolo and vibrato.
    pub lfo_frequency: Frequency,
    /// Depth multiplier shared by tremolo and vibrato.
    pub lfo_volume: Volume,
    pub wave_filter_half_step: Option<f64>,
    pub pulse_width: f64,
    /// Three sines wobbling the pulse width; only read for pulse waves.
    pub pulse_lfo_frequencies: Option<[Frequency; 3]>,
    pub power_lfo: Option<PowerLfoTuning>,
}

impl Default for PartialTuning {
    fn default() -> Self {
        Self {
            wave: WaveType::Sine,
            multiplier: 1.0,
            left: 1.0,
            right: 1.0,
            phase: 0.0,
            tremolo_volume: 0.0,
            tremolo_phase: 0.0,
            vibrato_size: 0.0,
            vibrato_phase: 0.0,
            freq_half_step: 0.0,
            lfo_frequency: 1.0,
            lfo_volume: 0.0,
            wave_filter_half_step: None,
            pulse_width: 0.5,
            pulse_lfo_frequencies: None,
            power_lfo: None,
        }
    }
}

const PULSE_LFOS_A: [Frequency; 3] = [0.8543, 0.58730928, 13.452345];
const PULSE_LFOS_B: [Frequency; 3] = [0.74299482, 6.697837240, 0.674982095];
const PULSE_LFOS_C: [Frequency; 3] = [0.56299482, 6.697837240, 7.7984593874597];

/// The keyboard's seven partials: three detuned pulses, two sines, two saws.
pub fn keys_partials() -> Vec<PartialTuning> {
    let t = PartialTuning::default;
    vec![
        PartialTuning {
            wave: WaveType::Pulse, multiplier: 1.0, left: 0.8, right: 0.08,
            tremolo_volume: 0.3, tremolo_phase: 25.0, vibrato_size: 4.0, vibrato_phase: 73.0,
            freq_half_step: 0.15, lfo_frequency: 1.0, lfo_volume: 0.1,
            wave_filter_half_step: Some(0.9),
            pulse_width: 0.24957657, pulse_lfo_frequencies: Some(PULSE_LFOS_A),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Pulse, multiplier: 0.99867575, left: 0.9, right: 0.6, phase: 45.0,
            tremolo_volume: 0.5, tremolo_phase: 98.0, vibrato_size: 7.0, vibrato_phase: 45.0,
            freq_half_step: 0.16, lfo_frequency: 1.43967086, lfo_volume: 0.05,
            wave_filter_half_step: Some(0.9),
            pulse_width: 0.15957657, pulse_lfo_frequencies: Some(PULSE_LFOS_B),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Pulse, multiplier: 1.0017567, left: 0.6, right: 0.9, phase: 61.0,
            tremolo_volume: 0.2, tremolo_phase: 112.0, vibrato_size: 7.0, vibrato_phase: 11.0,
            freq_half_step: 0.12, lfo_frequency: 1.2, lfo_volume: 0.08,
            wave_filter_half_step: Some(0.9),
            pulse_width: 0.8567, pulse_lfo_frequencies: Some(PULSE_LFOS_C),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Sine, multiplier: 0.5, left: 1.0, right: 1.0,
            tremolo_volume: 0.3, tremolo_phase: 25.0, vibrato_size: 2.0, vibrato_phase: 73.0,
            freq_half_step: 0.15, lfo_frequency: 1.0, lfo_volume: 0.15,
            wave_filter_half_step: Some(0.9),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Sine, multiplier: 1.0, left: 0.3, right: 0.3,
            tremolo_volume: 0.3, tremolo_phase: 25.0, vibrato_size: 3.0, vibrato_phase: 73.0,
            freq_half_step: 0.15, lfo_frequency: 1.0, lfo_volume: 0.15,
            wave_filter_half_step: Some(0.9),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Saw, multiplier: 0.998899273, left: 0.2, right: 0.1, phase: 45.0,
            tremolo_volume: 0.5, tremolo_phase: 98.0, vibrato_size: 3.0, vibrato_phase: 45.0,
            freq_half_step: 0.16, lfo_frequency: 1.43967086, lfo_volume: 0.1,
            ..t()
        },
        PartialTuning {
            wave: WaveType::Saw, multiplier: 1.001928374, left: 0.1, right: 0.2, phase: 61.0,
            tremolo_volume: 0.2, tremolo_phase: 112.0, vibrato_size: 3.0, vibrato_phase: 11.0,
            freq_half_step: 0.12, lfo_frequency: 1.2, lfo_volume: 0.08,
            ..t()
        },
    ]
}

const DRONE_DETUNE_SIZE: f64 = 1.9;
const DRONE_TREMOLO_VOLUME: Volume = 3.0;
const DRONE_VIBRATO_SIZE: Frequency = 1.5;

/// Widen the distance between a nominal ratio and its detuned twin.
fn detuned(multiplier: f64, detuned: f64) -> f64 {
    multiplier + (detuned - multiplier) * DRONE_DETUNE_SIZE
}

/// The drone's four partials.
pub fn drone_partials() -> Vec<PartialTuning> {
    let t = PartialTuning::default;
    let power = |frequency, phase, volume| Some(PowerLfoTuning { frequency, phase, volume });
    vec![
        PartialTuning {
            wave: WaveType::Pulse, multiplier: detuned(1.0, 1.0), left: 0.8, right: 0.8,
            tremolo_volume: 0.3 * DRONE_TREMOLO_VOLUME, tremolo_phase: 25.0,
            vibrato_size: DRONE_VIBRATO_SIZE, vibrato_phase: 73.0,
            freq_half_step: 0.15, lfo_frequency: 1.0, lfo_volume: 0.15,
            wave_filter_half_step: Some(1.0),
            pulse_width: 0.24957657, pulse_lfo_frequencies: Some(PULSE_LFOS_A),
            power_lfo: power(0.2, 0.0, 0.95),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Pulse, multiplier: detuned(1.0, 0.99927575), left: 0.9, right: 0.6, phase: 45.0,
            tremolo_volume: 0.5 * DRONE_TREMOLO_VOLUME, tremolo_phase: 98.0,
            vibrato_size: DRONE_VIBRATO_SIZE, vibrato_phase: 45.0,
            freq_half_step: 0.16, lfo_frequency: 1.43967086, lfo_volume: 0.1,
            wave_filter_half_step: Some(1.0),
            pulse_width: 0.15957657, pulse_lfo_frequencies: Some(PULSE_LFOS_B),
            power_lfo: power(0.2, 90.0, 1.0),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Sine, multiplier: detuned(2.0, 2.001458), left: 0.8, right: 0.8,
            tremolo_volume: 0.2 * DRONE_TREMOLO_VOLUME, tremolo_phase: 25.0,
            vibrato_size: 0.75 * DRONE_VIBRATO_SIZE, vibrato_phase: 73.0,
            freq_half_step: 0.15, lfo_frequency: 1.073, lfo_volume: 0.1,
            wave_filter_half_step: Some(0.1),
            pulse_width: 0.9334,
            power_lfo: power(0.1, 90.0, 1.0),
            ..t()
        },
        PartialTuning {
            wave: WaveType::Sine, multiplier: detuned(1.0, 0.99948), left: 1.0, right: 1.0,
            tremolo_volume: 0.3 * DRONE_TREMOLO_VOLUME, tremolo_phase: 25.0,
            vibrato_size: DRONE_VIBRATO_SIZE, vibrato_phase: 73.0,
            freq_half_step: 0.15, lfo_frequency: 1.3928347, lfo_volume: 0.1,
            wave_filter_half_step: Some(0.2),
            pulse_width: 0.05,
            power_lfo: power(0.2 / 3.0, 0.0, 1.0),
            ..t()
        },
    ]
}

/// Parse a JSON table and check it fits a bank of `expected` partials.
pub fn parse_partials(json: &str, instrument: &'static str, expected: usize) -> Result<Vec<PartialTuning>> {
    let partials: Vec<PartialTuning> = serde_json::from_str(json)?;
    if partials.len() != expected {
        return Err(Error::PartialCount { instrument, expected, got: partials.len() });
    }
    Ok(partials)
}

/// Load a table from disk, falling back to `builtin` (with a warning) on any failure.
pub fn partials_from_file_or(
    path: impl AsRef<Path>,
    instrument: &'static str,
    builtin: Vec<PartialTuning>,
) -> Vec<PartialTuning> {
    let path = path.as_ref();
    let loaded = fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|json| parse_partials(&json, instrument, builtin.len()));
    match loaded {
        Ok(partials) => partials,
        Err(e) => {
            warn!("{instrument}: can't use tuning {}: {e}; keeping the built-in table", path.display());
            builtin
        }
    }
}
