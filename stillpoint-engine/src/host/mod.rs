//! Audio host adapter boundary
//!
//! The engine does not decode audio or talk to devices; it schedules. An
//! [`AudioHost`] owns three voices (two main, one overlay), a gain node per
//! voice plus a master gain, and a monotonic render clock counted in sample
//! frames at the output rate. Platform implementations wrap the native
//! audio graph; [`SimulatedHost`] is the in-process reference used by
//! tests and benches.

mod sim;

pub use sim::{GainWrite, SimulatedHost};

use async_trait::async_trait;
use std::time::Duration;
use stillpoint_common::{Track, TrackSource};
use thiserror::Error;

/// One of the three independently-scheduled playback voices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voice {
    MainA,
    MainB,
    Overlay,
}

impl Voice {
    /// The gain node belonging to this voice
    pub fn gain(&self) -> Gain {
        match self {
            Voice::MainA => Gain::VoiceA,
            Voice::MainB => Gain::VoiceB,
            Voice::Overlay => Gain::Overlay,
        }
    }
}

/// Addressable gain nodes: one per voice plus the shared master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gain {
    VoiceA,
    VoiceB,
    Overlay,
    Master,
}

/// A track resolved by the host, with its discovered duration
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub track: Track,
    /// Resolved duration (also written back into `track.duration`)
    pub duration: Duration,
    /// Duration in sample frames at the host's output rate
    pub frames: u64,
}

/// Errors surfaced by the host boundary
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("buffer scheduling failed: {0}")]
    SchedulingFailed(String),

    #[error("voice {0:?} not ready")]
    VoiceNotReady(Voice),

    /// The host lost its state (external reset); recovery required
    #[error("audio engine reset")]
    EngineReset,

    #[error("load failed: {0}")]
    LoadFailed(String),
}

/// Capabilities the engine consumes from the platform audio graph
///
/// All methods are safe to call from any task. `render_time_now` is
/// strictly non-decreasing; `schedule` returns once the buffer is queued
/// (not when it is heard), with the start deferred to `at_frame`.
#[async_trait]
pub trait AudioHost: Send + Sync {
    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Scheduling-latency cover added to `render_time_now` when picking a
    /// start frame; stable for the lifetime of the host
    fn lead_frames(&self) -> u64;

    /// Monotonic render clock in sample frames at the output rate
    fn render_time_now(&self) -> u64;

    /// Decode `source` into the voice's buffer, resolving its duration
    async fn load(&self, voice: Voice, source: &TrackSource) -> Result<LoadedTrack, HostError>;

    /// Queue the voice's loaded buffer to start at `at_frame`, beginning
    /// `offset` into the track
    async fn schedule(
        &self,
        voice: Voice,
        at_frame: u64,
        offset: Duration,
    ) -> Result<(), HostError>;

    /// Immediate silence for the voice; its buffer stays loaded
    fn stop_voice(&self, voice: Voice);

    /// Freeze the voice at its current playback position
    fn pause_voice(&self, voice: Voice);

    /// Continue a paused voice from its frozen position
    fn resume_voice(&self, voice: Voice);

    /// Release the voice's buffer
    fn unload(&self, voice: Voice);

    /// Instantaneous gain set; implementations clamp to [0.0, 1.0]
    fn set_gain(&self, gain: Gain, value: f32);

    /// Current value of a gain node
    fn gain(&self, gain: Gain) -> f32;
}
