//! Main playback core
//!
//! **Module structure:**
//! - `core.rs`: engine struct, voice slots, lifecycle plumbing, recovery
//! - `transport.rs`: start, pause, resume, stop, seek, skips, volume
//! - `crossfade.rs`: crossfade sessions and the envelope driver
//! - `ticker.rs`: position tick, auto-advance trigger, finish fade-out

mod core;
mod crossfade;
mod ticker;
mod transport;

pub use self::core::PlaybackCore;
pub use self::crossfade::CrossfadeSnapshot;

use crate::fade::CancelFlag;
use crate::host::{AudioHost, Gain, LoadedTrack, Voice};
use std::time::Duration;
use stillpoint_common::{time, FadeCurve};

/// Which of the two main voices is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WhichVoice {
    A,
    B,
}

impl WhichVoice {
    pub(crate) fn voice(self) -> Voice {
        match self {
            WhichVoice::A => Voice::MainA,
            WhichVoice::B => Voice::MainB,
        }
    }

    pub(crate) fn gain(self) -> Gain {
        self.voice().gain()
    }

    pub(crate) fn other(self) -> WhichVoice {
        match self {
            WhichVoice::A => WhichVoice::B,
            WhichVoice::B => WhichVoice::A,
        }
    }
}

/// Book-keeping for one main voice
#[derive(Debug, Default)]
pub(crate) struct VoiceSlot {
    pub loaded: Option<LoadedTrack>,
    /// Playlist index of the loaded track
    pub playlist_index: Option<usize>,
    /// Render frame the current schedule started at
    pub started_at: Option<u64>,
    /// Offset into the track at schedule time
    pub offset: Duration,
    /// Frozen position while paused; also used for seek-while-paused
    pub paused_position: Option<Duration>,
}

impl VoiceSlot {
    /// Current playback position within the loaded track
    pub(crate) fn position(&self, host: &dyn AudioHost) -> Option<Duration> {
        if let Some(frozen) = self.paused_position {
            return Some(frozen);
        }
        let started = self.started_at?;
        let now = host.render_time_now();
        let played = time::duration_for(now.saturating_sub(started), host.sample_rate());
        Some(self.offset + played)
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.loaded.as_ref().map(|loaded| loaded.duration)
    }

    pub(crate) fn clear(&mut self) {
        *self = VoiceSlot::default();
    }
}

/// The two main voices plus the active pointer
#[derive(Debug)]
pub(crate) struct VoicePair {
    pub a: VoiceSlot,
    pub b: VoiceSlot,
    pub active: WhichVoice,
}

impl Default for VoicePair {
    fn default() -> Self {
        Self {
            a: VoiceSlot::default(),
            b: VoiceSlot::default(),
            active: WhichVoice::A,
        }
    }
}

impl VoicePair {
    pub(crate) fn slot(&self, which: WhichVoice) -> &VoiceSlot {
        match which {
            WhichVoice::A => &self.a,
            WhichVoice::B => &self.b,
        }
    }

    pub(crate) fn slot_mut(&mut self, which: WhichVoice) -> &mut VoiceSlot {
        match which {
            WhichVoice::A => &mut self.a,
            WhichVoice::B => &mut self.b,
        }
    }

    pub(crate) fn active_slot(&self) -> &VoiceSlot {
        self.slot(self.active)
    }

    pub(crate) fn inactive(&self) -> WhichVoice {
        self.active.other()
    }
}

/// Active crossfade record; at most one in flight per player
#[derive(Debug)]
pub(crate) struct CrossfadeSession {
    pub id: u64,
    pub from: WhichVoice,
    pub to: WhichVoice,
    pub duration: Duration,
    pub started_at_frame: u64,
    pub curve: FadeCurve,
    pub cancel: CancelFlag,
    /// Progress the session began at (non-zero after a pause/resume)
    pub start_progress: f32,
}

impl CrossfadeSession {
    /// Instantaneous progress derived from the render clock
    pub(crate) fn progress(&self, host: &dyn AudioHost) -> f32 {
        let elapsed_frames = host
            .render_time_now()
            .saturating_sub(self.started_at_frame);
        let total_frames = time::frames_for(self.duration, host.sample_rate());
        if total_frames == 0 {
            return 1.0;
        }
        let span = 1.0 - self.start_progress;
        (self.start_progress + span * (elapsed_frames as f32 / total_frames as f32)).min(1.0)
    }
}

/// Crossfade state carried across a pause
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrozenCrossfade {
    pub id: u64,
    pub from: WhichVoice,
    pub to: WhichVoice,
    pub progress: f32,
    pub remaining: Duration,
    pub curve: FadeCurve,
}
