//! Core track and playlist value types
//!
//! Tracks are immutable descriptions of playable content. The engine never
//! holds decoded audio itself; a [`TrackSource`] is a handle the audio host
//! knows how to resolve, and `duration` stays `None` until the host has
//! loaded the track once.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Unique track identity, stable across playlist edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content handle the audio host resolves into PCM
///
/// The engine treats sources as opaque; decoding is entirely the host's
/// concern. `Named` sources address a host-side registry and are what the
/// simulated host (and embedded asset bundles) use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackSource {
    /// Audio file on disk
    File { path: PathBuf },
    /// Registry key resolved by the host
    Named { key: String },
}

impl TrackSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self::Named { key: key.into() }
    }

    /// Human-readable description for logs and errors
    pub fn describe(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Named { key } => key.clone(),
        }
    }
}

/// Optional display metadata carried alongside a track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Handle to artwork (URL or asset key); presentation is the sink's job
    pub artwork: Option<String>,
}

/// Immutable playable track
///
/// Duration is resolved lazily: it is `None` until the host has decoded the
/// source once, after which the engine caches the discovered value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub source: TrackSource,
    #[serde(default)]
    pub metadata: TrackMetadata,
    pub duration: Option<Duration>,
}

impl Track {
    pub fn new(source: TrackSource) -> Self {
        Self {
            id: TrackId::new(),
            source,
            metadata: TrackMetadata::default(),
            duration: None,
        }
    }

    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Title if present, otherwise the source description
    pub fn display_title(&self) -> String {
        self.metadata
            .title
            .clone()
            .unwrap_or_else(|| self.source.describe())
    }
}

/// Auto-advance policy at end of track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// Play through once, then finish
    #[default]
    Off,
    /// Loop the current track
    SingleTrack,
    /// Wrap from the last track back to the head
    Playlist,
}

impl RepeatMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Some(Self::Off),
            "single" | "single_track" | "track" => Some(Self::SingleTrack),
            "playlist" | "all" => Some(Self::Playlist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::SingleTrack => "single_track",
            Self::Playlist => "playlist",
        }
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overlay loop policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LoopMode {
    /// Play a single iteration
    Once,
    /// Play exactly `n` iterations (n >= 1)
    Count { n: u32 },
    /// Loop until stopped
    Infinite,
}

impl LoopMode {
    /// Whether another iteration should run after `completed` finished ones
    pub fn wants_iteration(&self, completed: u32) -> bool {
        match self {
            Self::Once => completed == 0,
            Self::Count { n } => completed < *n,
            Self::Infinite => true,
        }
    }

    /// Whether `completed + 1` is the final iteration, when that is knowable
    pub fn is_final_iteration(&self, completed: u32) -> bool {
        match self {
            Self::Once => completed == 0,
            Self::Count { n } => completed + 1 >= *n,
            Self::Infinite => false,
        }
    }
}
