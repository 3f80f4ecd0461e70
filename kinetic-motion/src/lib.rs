//! Kinetic Motion: turns a stream of 3-axis sensor samples into segments and beats.
//!
//! Modules
//! - [`trajectory`] : `Trajectory` (buffered position/velocity/acceleration), `Segment`, `Point`
//! - [`acc`]        : `AccEngine` beat classifier with `BeatConfig` thresholds and feed listeners
//!
//! A `Trajectory` is single-writer: feed it and query it from the same thread. `AccEngine`
//! calls its listeners synchronously inside `feed_acc`, in the order segments end.

pub mod acc;
pub mod trajectory;

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::acc::{AccEngine, AccFeedListener, BeatConfig, ConfigError, ListenerId, MAX_BEAT_AMPLITUDE};
    pub use crate::trajectory::{
        angle_deg, z_axis, PeakHistory, Point, Segment, SegmentDetectionType, SegmentType, Trajectory, Vector3D,
    };
}
