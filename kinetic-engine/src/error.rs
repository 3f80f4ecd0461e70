//! Recoverable failures at the engine's I/O edges.
//!
//! Everything on the audio path is infallible; invariant violations there panic.
//! What can fail is loading samples and tuning tables, and opening a device.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav decoding failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("invalid tuning table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sample `{name}` must be interleaved stereo, got {channels} channel(s)")]
    NotStereo { name: String, channels: u16 },

    #[error("sample `{0}` holds no frames")]
    EmptySample(String),

    #[error("tuning table for {instrument} needs {expected} partials, got {got}")]
    PartialCount { instrument: &'static str, expected: usize, got: usize },

    #[error("no instrument at index {0}")]
    InstrumentIndex(usize),

    #[error("audio device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "realtime")]
mod device {
    use super::Error;

    macro_rules! device_error {
        ($($t:ty),* $(,)?) => {$(
            impl From<$t> for Error {
                fn from(e: $t) -> Self { Error::Device(e.to_string()) }
            }
        )*};
    }

    device_error!(
        cpal::DevicesError,
        cpal::DeviceNameError,
        cpal::DefaultStreamConfigError,
        cpal::SupportedStreamConfigsError,
        cpal::BuildStreamError,
        cpal::PlayStreamError,
    );
}
