//! # Playback Error Types
//!
//! Error types for the streaming pipeline. Only failures that end a stream
//! or reject a caller request live here. Missing data is reported through
//! [`PullOutcome::NeedMoreData`](crate::adapter::PullOutcome) and is never an
//! error.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during streaming playback.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// Audio source cannot be opened (file missing, host unreachable).
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// The transport reported a failure after the stream started.
    #[error("Transport failed: {0}")]
    Transport(String),

    // ========================================================================
    // Format/Codec Errors
    // ========================================================================
    /// The decoder cannot handle the stream's format.
    #[error("Unsupported audio format: {0}")]
    FormatUnsupported(String),

    /// The decoder failed in a way it cannot recover from.
    #[error("Decoder failed: {0}")]
    DecoderFatal(String),

    // ========================================================================
    // Playback Control Errors
    // ========================================================================
    /// Seek target outside `[0, duration]`. Seeks are clamped, so this is
    /// only produced for logging.
    #[error("Seek to {requested}s outside [0, {duration}s]")]
    SeekOutOfRange { requested: f64, duration: f64 },

    /// The format has not been identified yet.
    #[error("Stream not ready")]
    NotReady,

    /// Requested playback rate outside the configured bounds.
    #[error("Invalid playback rate: {0}")]
    InvalidRate(f32),

    /// The session actor has already shut down.
    #[error("Stream session closed")]
    SessionClosed,

    /// No session is registered under the key.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    // ========================================================================
    // Platform/Adapter Errors
    // ========================================================================
    /// The playback sink rejected an operation.
    #[error("Playback sink error: {0}")]
    Sink(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if reopening the same source may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::SourceUnavailable(_)
                | PlaybackError::Transport(_)
                | PlaybackError::NotReady
        )
    }

    /// Returns `true` if this error tears the stream down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlaybackError::SourceUnavailable(_)
                | PlaybackError::Transport(_)
                | PlaybackError::FormatUnsupported(_)
                | PlaybackError::DecoderFatal(_)
                | PlaybackError::Sink(_)
                | PlaybackError::Internal(_)
        )
    }

    /// Returns `true` if this error is related to the audio format.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::FormatUnsupported(_) | PlaybackError::DecoderFatal(_)
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
