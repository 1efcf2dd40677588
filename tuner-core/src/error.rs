//! Error types for the tuner engine.
//!
//! Only session start can fail. Everything that goes wrong while the
//! tracking loop is running is absorbed as "no pitch" for that tick.

use thiserror::Error;

/// Errors surfaced to the consumer of a tuner session.
#[derive(Debug, Error)]
pub enum TunerError {
    /// The microphone is missing, access was denied, or it offers no
    /// usable input format. The caller must re-request access.
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The tracking loop thread could not be spawned.
    #[error("failed to spawn tracking loop thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A config file could not be parsed or serialized.
    #[error("invalid tuner config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tuner operations.
pub type Result<T> = std::result::Result<T, TunerError>;

impl TunerError {
    pub(crate) fn device(reason: impl std::fmt::Display) -> Self {
        Self::DeviceUnavailable(reason.to_string())
    }
}
