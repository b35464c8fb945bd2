//! Error types for the playback engine
//!
//! One flat enum with stable variant names. Errors split into user errors
//! (bad input or an operation the current lifecycle state forbids; no
//! state change), resource errors (loads, session configuration; may move
//! the lifecycle to Failed when they interrupt playback), host errors
//! (recovery is attempted first), and cancellation (usually invisible to
//! the user; surfaced only when completion was explicitly awaited).

use crate::host::HostError;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Playlist operations need at least one track
    #[error("playlist is empty")]
    EmptyPlaylist,

    /// Operation needs a loaded track and none is present
    #[error("no track loaded")]
    NoTrackLoaded,

    /// Already at the last track
    #[error("no next track")]
    NoNextTrack,

    /// Already at the first track
    #[error("no previous track")]
    NoPreviousTrack,

    /// Playlist index outside `0..len`
    #[error("index {index} out of range (playlist has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    /// A state machine rejected the operation
    #[error("operation '{operation}' not allowed in state {state}")]
    InvalidState { operation: String, state: String },

    /// Configuration or argument validation failed
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The host could not load/decode a track source
    #[error("file load failed: {reason}")]
    FileLoadFailed { reason: String },

    /// Platform audio session could not be configured or validated
    #[error("session configuration failed: {reason}")]
    SessionConfigurationFailed { reason: String },

    /// The audio host lost its state; recovery was attempted and failed
    #[error("audio host engine reset")]
    HostEngineReset,

    /// Command arrived inside the rate-limit window of the previous one
    #[error("rate limited")]
    RateLimited,

    /// Operation was cancelled cooperatively (pre-empted or superseded)
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// User errors leave engine state untouched and are simply reported
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyPlaylist
                | Error::NoTrackLoaded
                | Error::NoNextTrack
                | Error::NoPreviousTrack
                | Error::IndexOutOfRange { .. }
                | Error::InvalidState { .. }
                | Error::InvalidParameter { .. }
                | Error::RateLimited
        )
    }

    /// Whether this failure, when it interrupts playback, moves the
    /// lifecycle machine to `Failed`
    pub fn fails_playback(&self) -> bool {
        matches!(
            self,
            Error::FileLoadFailed { .. }
                | Error::SessionConfigurationFailed { .. }
                | Error::HostEngineReset
        )
    }
}

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        match err {
            HostError::LoadFailed(reason) => Error::FileLoadFailed { reason },
            HostError::SchedulingFailed(reason) => Error::FileLoadFailed {
                reason: format!("buffer scheduling failed: {reason}"),
            },
            HostError::VoiceNotReady(voice) => Error::FileLoadFailed {
                reason: format!("voice {voice:?} not ready"),
            },
            HostError::EngineReset => Error::HostEngineReset,
        }
    }
}

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, Error>;
