//! Kinetic Core: ring buffers and sound-unit primitives shared by the motion and
//! synthesis crates.
//!
//! Features
//! - `libm`     : route sin/cos/atan2 through `libm` instead of std
//! - `fast-math`: polynomial sine for oscillators (approximate)
//!
//! Modules
//! - [`buffers`]     : `CircularBuffer`, `CircularSummedBuffer` (O(1) range averages)
//! - [`dsp`]         : math backend, interpolation, angle helpers, playability checks
//! - [`sound`]       : sample aliases and `StereoSample`
//! - [`oscillators`] : `WaveSource` (periodic waves, noise, stereo sample playback)
//! - [`envelopes`]   : stepped `Envelope` with accelerating release
//! - [`followers`]   : `HalfWayThere`, `Inertia`, `SmoothTransition`, `Stepper`
//! - [`effects`]     : feedback `Delays`, lookahead `Compressor`
//!
//! Design
//! - Every unit is ticked once per sample by its owner; none allocate after construction
//! - Sample rate is passed in explicitly, there is no global audio state
//! - Internal invariant violations panic; nothing here returns `Result`

pub mod buffers;
pub mod dsp;
pub mod effects;
pub mod envelopes;
pub mod followers;
pub mod oscillators;
pub mod sound;

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::buffers::{BackPos, CircularBuffer, CircularSummedBuffer, Summable, Timestamp};
    pub use crate::dsp::{
        clamp, clamp01, deg_to_rad, interpolate, is_frequency_playable, lerp, point_to_deg, rad_to_deg,
        SEMITONE_RATIO, TAU,
    };
    pub use crate::effects::{Compressor, DelayTap, Delays};
    pub use crate::envelopes::{Envelope, EnvelopeStep};
    pub use crate::followers::{Easing, HalfWayThere, Inertia, SmoothTransition, Stepper};
    pub use crate::oscillators::{WaveSource, WaveType};
    pub use crate::sound::{Frequency, Sample, StereoSample, Time, Volume, DEFAULT_SAMPLE_RATE};
}
