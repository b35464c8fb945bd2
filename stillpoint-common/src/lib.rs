//! # Stillpoint shared types (stillpoint-common)
//!
//! Value types and event plumbing shared between the playback engine and
//! its embedders: tracks and sources, fade curves, lifecycle states, the
//! typed event enum with its broadcast bus, and sample-frame timing
//! helpers.
//!
//! This crate is pure data: no I/O, no audio, no platform bindings.

pub mod events;
pub mod fade_curves;
pub mod states;
pub mod time;
pub mod types;

pub use events::{
    CrossfadePhase, CrossfadeProgress, EventBus, LogEntry, LogLevel, NowPlaying, PlayerEvent,
    PositionUpdate,
};
pub use fade_curves::FadeCurve;
pub use states::{LifecycleEvent, OverlayState, PlayerState};
pub use types::{LoopMode, RepeatMode, Track, TrackId, TrackMetadata, TrackSource};
