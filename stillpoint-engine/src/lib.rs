//! # Stillpoint playback engine (stillpoint-engine)
//!
//! Gapless audio playback core for meditation/ambient applications.
//!
//! **Purpose:** Play an ordered list of tracks with seamless, sample-
//! accurately scheduled crossfades between them; loop single tracks and
//! playlists with bounded or unbounded repeats; mix an independent overlay
//! voice on top; and expose the whole thing through a serialized command
//! API with reactive event streams.
//!
//! **Architecture:** Two main voices (A/B) with complementary gain
//! envelopes behind a shared master gain, plus one overlay voice. Decoding
//! and device output live behind the [`host::AudioHost`] boundary; the
//! engine schedules, fades, and keeps the books.

pub mod config;
pub mod error;
pub mod fade;
pub mod host;
pub mod ops;
pub mod overlay;
pub mod playback;
pub mod player;
pub mod playlist;
pub mod session;
pub mod surfaces;

pub use config::{OverlayConfig, PlayerConfig, SessionMode};
pub use error::{Error, Result};
pub use player::Player;
