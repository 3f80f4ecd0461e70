//! The capability seams every voice plugs into.
//!
//! - [`Instrument`]  : what the mixer and the conductor drive (audio thread + control thread)
//! - [`SampleDriven`]: optional, for voices that own PCM samples
//! - [`ControlInput`]: the per-feed orientation snapshot the conductor derives from the sensors
//!
//! Instruments are shared between the two threads as [`InstrumentHandle`]s. The mutex in the
//! handle is the per-instrument lock: `add_beat`/`update_input` and `generate_sample` never
//! overlap.

use std::sync::{Arc, Mutex};

use kinetic_core::prelude::*;
use kinetic_motion::prelude::Vector3D;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::Result;
use crate::sampler::SamplerSample;

/// Orientation snapshot pushed into the current instrument on every sensor feed.
///
/// Angles are in degrees. The two vectors are short moving averages of the accelerometer
/// trajectory, used by voices that react to holding still.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ControlInput {
    /// Heading relative to the orientation base, wrapped to ±180.
    pub geo_angle: f64,
    pub around_x: f64,
    pub around_y: f64,
    /// Mean acc velocity over the last 6 feeds.
    pub acc_velocity: Vector3D,
    /// Mean acc position over the last 4 feeds.
    pub acc_position: Vector3D,
}

/// A sound source the [`SoundEngine`](crate::mixer::SoundEngine) can mix.
///
/// Only `generate_sample` is mandatory; the control hooks default to no-ops so a plain
/// test tone is a valid instrument.
pub trait Instrument: Send {
    fn name(&self) -> &str;

    /// Audio thread: advance exactly one sample.
    fn generate_sample(&mut self) -> StereoSample;

    /// Trigger a note. `norm_freq` in [0, 1], `volume` is the raw beat amplitude.
    fn add_beat(&mut self, _norm_freq: f64, _volume: Volume) {}
    fn set_pitch(&mut self, _norm_freq: f64) {}
    fn set_volume(&mut self, _volume: Volume) {}
    fn set_sustain(&mut self, _sustained: bool) {}

    fn update_input(&mut self, _input: &ControlInput) {}
    fn on_gain_focus(&mut self) {}
    fn on_lose_focus(&mut self) {}

    fn unnormalize_frequency(&self, norm_freq: f64) -> Frequency {
        200.0 + norm_freq * norm_freq * (600.0 - 200.0)
    }

    /// A single mid-range beat, played when the instrument is previewed.
    fn play_demo(&mut self, volume: Volume) {
        self.add_beat(0.5, volume);
    }
}

/// Voices that play back loaded PCM.
pub trait SampleDriven {
    fn samples(&self) -> &[SamplerSample];

    /// Register a sample and return its index.
    fn add_sample(&mut self, sample: SamplerSample) -> usize;

    fn sample(&self, index: usize) -> &SamplerSample {
        let samples = self.samples();
        assert!(index < samples.len(), "sample index {index} out of {}", samples.len());
        &samples[index]
    }
}

pub type InstrumentHandle = Arc<Mutex<dyn Instrument>>;

/// Wrap an instrument for sharing with the mixer.
pub fn handle<I: Instrument + 'static>(instrument: I) -> InstrumentHandle {
    Arc::new(Mutex::new(instrument))
}

/// The built-in voices, by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstrumentKind {
    Keys,
    Drone,
    Drums,
}

impl InstrumentKind {
    /// Build the voice with its built-in tuning. Drums get the synthesized kit.
    pub fn build(self, sample_rate: Frequency) -> Result<InstrumentHandle> {
        Ok(match self {
            Self::Keys => handle(crate::keys::KeysInstrument::new(sample_rate)),
            Self::Drone => handle(crate::drone::DroneInstrument::new(sample_rate)),
            Self::Drums => handle(crate::drum_kit::DrumKitInstrument::synthesized(sample_rate)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    struct Dc(f64);

    impl Instrument for Dc {
        fn name(&self) -> &str { "dc" }
        fn generate_sample(&mut self) -> StereoSample { StereoSample::mono(self.0) }
    }

    #[test]
    fn defaults_are_inert() {
        let mut dc = Dc(0.25);
        dc.add_beat(1.0, 4.0);
        dc.update_input(&ControlInput::default());
        dc.play_demo(1.0);
        assert_eq!(dc.generate_sample(), StereoSample::mono(0.25));
    }

    #[test]
    fn default_pitch_curve_is_quadratic() {
        let dc = Dc(0.0);
        assert_eq!(dc.unnormalize_frequency(0.0), 200.0);
        assert_eq!(dc.unnormalize_frequency(0.5), 300.0);
        assert_eq!(dc.unnormalize_frequency(1.0), 600.0);
    }

    #[test]
    fn kinds_parse_from_cli_names() {
        assert_eq!(InstrumentKind::from_str("drone").ok(), Some(InstrumentKind::Drone));
        let names: Vec<String> = InstrumentKind::iter().map(|k| k.to_string()).collect();
        assert_eq!(names, ["keys", "drone", "drums"]);
    }

    #[test]
    fn every_kind_builds() {
        for kind in InstrumentKind::iter() {
            let h = kind.build(DEFAULT_SAMPLE_RATE).expect("built-in voice");
            let name = h.lock().expect("fresh lock").name().to_string();
            assert!(!name.is_empty());
        }
    }
}
