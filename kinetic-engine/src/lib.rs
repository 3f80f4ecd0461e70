//! Kinetic Engine: motion-driven instruments, the output mixer and the realtime glue.
//!
//! Crate layout:
//! - [`instrument`] : `Instrument` / `SampleDriven` traits, `ControlInput`, `InstrumentKind`
//! - [`kinetic`]    : focus/orientation bookkeeping and the note scale shared by motion voices
//! - [`partial`]    : one oscillator of an additive voice, plus the bouncing `CrossDelay`
//! - [`tuning`]     : serde partial tables, built in or loaded from JSON
//! - [`layout`]     : hit rects for keys and drum pads
//! - [`keys`], [`drone`], [`sampler`], [`drum_kit`] : the voices
//! - [`mixer`]      : `SoundEngine`, summing instruments into `f32` frames
//! - [`conductor`]  : sensor feeds → orientation input and beats for the focused voice
//! - [`stream`]     : cpal output (feature `realtime`)
//!
//! Two threads meet here. The sensor side calls into the [`Conductor`](conductor::Conductor),
//! the audio side into the [`SoundEngine`](mixer::SoundEngine); instruments sit between them
//! behind one mutex each.

pub mod conductor;
pub mod drone;
pub mod drum_kit;
pub mod error;
pub mod instrument;
pub mod keys;
pub mod kinetic;
pub mod layout;
pub mod mixer;
pub mod partial;
pub mod sampler;
#[cfg(feature = "realtime")]
pub mod stream;
pub mod tuning;

pub use error::{Error, Result};

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::conductor::Conductor;
    pub use crate::drone::DroneInstrument;
    pub use crate::drum_kit::DrumKitInstrument;
    pub use crate::error::{Error, Result};
    pub use crate::instrument::{handle, ControlInput, Instrument, InstrumentHandle, InstrumentKind, SampleDriven};
    pub use crate::keys::KeysInstrument;
    pub use crate::kinetic::{KineticState, INSTRUMENT_STOP_TIMEOUT};
    pub use crate::mixer::SoundEngine;
    pub use crate::sampler::{Sampler, SamplerInstrument, SamplerSample};
    #[cfg(feature = "realtime")]
    pub use crate::stream::{list_output_devices, OutputDevice};
    pub use crate::tuning::PartialTuning;
}

#[cfg(test)]
mod smoke {

    #[test]
    fn prelude_exists() {
        use crate::prelude::*;
        use kinetic_core::prelude::DEFAULT_SAMPLE_RATE;
        use kinetic_motion::prelude::AccEngine;
        use std::sync::Arc;

        let sound = Arc::new(SoundEngine::new(DEFAULT_SAMPLE_RATE));
        let keys = InstrumentKind::Keys.build(DEFAULT_SAMPLE_RATE).expect("keys");
        let mut conductor = Conductor::new(AccEngine::default(), Arc::clone(&sound), vec![keys]);
        conductor.select_instrument(0).expect("one instrument");
        let mut out = [0.0_f32; 64];
        sound.generate_interleaved(&mut out);
        assert!(out.iter().all(|x| x.is_finite()));
    }
}
