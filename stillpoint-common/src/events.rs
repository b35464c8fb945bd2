//! Typed engine events and the broadcast event bus
//!
//! The engine communicates through one-to-many broadcasting: every
//! noteworthy moment becomes a [`PlayerEvent`] on the [`EventBus`], and the
//! dedicated surfaces (state, position, track, crossfade progress) carry
//! their own lighter payloads. Producers never block on subscribers; a slow
//! subscriber lags and loses its own tail, not the producer's.

use crate::states::{OverlayState, PlayerState};
use crate::types::{RepeatMode, TrackId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

/// Severity of an event-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Human-readable entry on the bounded event log surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Phase of an in-flight crossfade, published at >= 10 Hz while fading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum CrossfadePhase {
    /// Loading and scheduling the incoming voice
    Preparing,
    /// Paired envelopes running; progress in [0, 1]
    Fading { progress: f32 },
    /// Active-voice pointer about to swap
    Switching,
    /// Outgoing voice being stopped and unloaded
    Cleanup,
    /// No crossfade in flight
    Idle,
}

/// Progress report for one crossfade session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossfadeProgress {
    /// Monotonic session id
    pub id: u64,
    pub phase: CrossfadePhase,
}

/// Position report on the position surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position: Duration,
    /// None until the host has resolved the track's duration
    pub duration: Option<Duration>,
}

/// Now-playing snapshot pushed to the remote metadata sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<String>,
    pub duration: Option<Duration>,
    pub elapsed: Duration,
    /// 1.0 while playing, 0.0 while paused
    pub playback_rate: f32,
}

/// Typed engine events
///
/// Broadcast on the engine-wide bus; each maps onto a [`LogEntry`] for the
/// human-readable log surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Lifecycle transition (identical consecutive states are suppressed
    /// on the state surface, not here)
    StateChanged {
        old_state: PlayerState,
        new_state: PlayerState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playlist contents replaced via load
    PlaylistLoaded {
        track_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playlist atomically swapped while the player stayed live
    PlaylistSwapped {
        track_count: usize,
        crossfade: Duration,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track became the audible active voice
    TrackStarted {
        track_id: TrackId,
        title: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track left the active voice (completed or skipped away from)
    TrackFinished {
        track_id: TrackId,
        completed: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    CrossfadeStarted {
        crossfade_id: u64,
        from_track: Option<TrackId>,
        to_track: TrackId,
        duration: Duration,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    CrossfadeCompleted {
        crossfade_id: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Crossfade cancelled before completion; gains stay where they were
    CrossfadeCancelled {
        crossfade_id: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    VolumeChanged {
        old_volume: f32,
        new_volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    Seeked {
        position: Duration,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    RepeatModeChanged {
        mode: RepeatMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    OverlayStateChanged {
        old_state: OverlayState,
        new_state: OverlayState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One overlay loop iteration finished
    OverlayLoopCompleted {
        loops_elapsed: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An operation failed; lifecycle may have moved to Failed
    PlaybackError {
        operation: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Host-reset or session self-heal attempt
    RecoveryAttempted {
        attempt: u32,
        succeeded: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Non-fatal session condition worth surfacing (e.g. an externally
    /// owned session that does not permit playback)
    SessionWarning {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            PlayerEvent::StateChanged { timestamp, .. }
            | PlayerEvent::PlaylistLoaded { timestamp, .. }
            | PlayerEvent::PlaylistSwapped { timestamp, .. }
            | PlayerEvent::TrackStarted { timestamp, .. }
            | PlayerEvent::TrackFinished { timestamp, .. }
            | PlayerEvent::CrossfadeStarted { timestamp, .. }
            | PlayerEvent::CrossfadeCompleted { timestamp, .. }
            | PlayerEvent::CrossfadeCancelled { timestamp, .. }
            | PlayerEvent::VolumeChanged { timestamp, .. }
            | PlayerEvent::Seeked { timestamp, .. }
            | PlayerEvent::RepeatModeChanged { timestamp, .. }
            | PlayerEvent::OverlayStateChanged { timestamp, .. }
            | PlayerEvent::OverlayLoopCompleted { timestamp, .. }
            | PlayerEvent::PlaybackError { timestamp, .. }
            | PlayerEvent::RecoveryAttempted { timestamp, .. }
            | PlayerEvent::SessionWarning { timestamp, .. } => *timestamp,
        }
    }

    /// Render for the bounded human-readable log surface
    pub fn to_log_entry(&self) -> LogEntry {
        let (level, message) = match self {
            PlayerEvent::StateChanged { old_state, new_state, .. } => (
                LogLevel::Info,
                format!("state changed: {} -> {}", old_state, new_state),
            ),
            PlayerEvent::PlaylistLoaded { track_count, .. } => {
                (LogLevel::Info, format!("playlist loaded ({} tracks)", track_count))
            }
            PlayerEvent::PlaylistSwapped { track_count, .. } => {
                (LogLevel::Info, format!("playlist swapped ({} tracks)", track_count))
            }
            PlayerEvent::TrackStarted { title, track_id, .. } => (
                LogLevel::Success,
                format!(
                    "now playing: {}",
                    title.clone().unwrap_or_else(|| track_id.to_string())
                ),
            ),
            PlayerEvent::TrackFinished { track_id, completed, .. } => (
                LogLevel::Info,
                format!(
                    "track {} {}",
                    track_id,
                    if *completed { "completed" } else { "skipped" }
                ),
            ),
            PlayerEvent::CrossfadeStarted { crossfade_id, duration, .. } => (
                LogLevel::Info,
                format!("crossfade #{} started ({:.1}s)", crossfade_id, duration.as_secs_f64()),
            ),
            PlayerEvent::CrossfadeCompleted { crossfade_id, .. } => {
                (LogLevel::Success, format!("crossfade #{} completed", crossfade_id))
            }
            PlayerEvent::CrossfadeCancelled { crossfade_id, .. } => {
                (LogLevel::Info, format!("crossfade #{} cancelled", crossfade_id))
            }
            PlayerEvent::VolumeChanged { new_volume, .. } => {
                (LogLevel::Info, format!("volume set to {:.2}", new_volume))
            }
            PlayerEvent::Seeked { position, .. } => {
                (LogLevel::Info, format!("seeked to {:.1}s", position.as_secs_f64()))
            }
            PlayerEvent::RepeatModeChanged { mode, .. } => {
                (LogLevel::Info, format!("repeat mode: {}", mode))
            }
            PlayerEvent::OverlayStateChanged { old_state, new_state, .. } => (
                LogLevel::Info,
                format!("overlay: {} -> {}", old_state, new_state),
            ),
            PlayerEvent::OverlayLoopCompleted { loops_elapsed, .. } => {
                (LogLevel::Info, format!("overlay loop {} completed", loops_elapsed))
            }
            PlayerEvent::PlaybackError { operation, message, .. } => {
                (LogLevel::Error, format!("{} failed: {}", operation, message))
            }
            PlayerEvent::RecoveryAttempted { attempt, succeeded, .. } => (
                LogLevel::Warning,
                format!(
                    "recovery attempt {} {}",
                    attempt,
                    if *succeeded { "succeeded" } else { "failed" }
                ),
            ),
            PlayerEvent::SessionWarning { message, .. } => {
                (LogLevel::Warning, message.clone())
            }
        };

        LogEntry {
            level,
            message,
            timestamp: self.timestamp(),
        }
    }
}

/// One-to-many broadcast bus for [`PlayerEvent`]
///
/// Thin wrapper over `tokio::sync::broadcast`. Subscribers receive only
/// events emitted after they subscribed; when a subscriber falls more than
/// `capacity` events behind, its oldest pending events are dropped.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; errors when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, silently dropping it when nobody is subscribed
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
