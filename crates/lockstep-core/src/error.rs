//! Error types for Lockstep.

use thiserror::Error;

use crate::types::StreamKind;

/// Result type alias using Lockstep's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Lockstep.
#[derive(Error, Debug)]
pub enum Error {
    /// A buffering primitive was shut down.
    #[error("Operation aborted")]
    Aborted,

    // Collaborator errors
    #[error("Demux error: {0}")]
    Demux(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Presentation error: {0}")]
    Present(String),

    /// The collaborator itself is unusable; the owning stage must stop.
    #[error("Fatal error: {0}")]
    Fatal(String),

    // Setup errors
    #[error("No decodable {0} stream found")]
    NoStream(StreamKind),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error came from a primitive being aborted.
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the stage that observed this error must stop.
    ///
    /// Per-unit collaborator failures (a corrupt packet, a frame the filter
    /// rejects) are not fatal; the unit is skipped and the stage keeps going.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::Fatal(_) | Self::Io(_) | Self::AudioOutput(_) | Self::Internal(_)
        )
    }
}
