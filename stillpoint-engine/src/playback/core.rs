//! Engine struct, lifecycle plumbing, and recovery
//!
//! `PlaybackCore` owns the two main voices, the in-flight crossfade
//! session, and the sole copy of `PlayerConfig`. All public operations are
//! serialized by the operation queue; the locks here exist for the
//! background tasks (ticker, envelope drivers) that share the core.

use super::{CrossfadeSession, FrozenCrossfade, VoicePair, WhichVoice};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::fade::{CancelFlag, FadeEngine};
use crate::host::{AudioHost, Gain};
use crate::surfaces::{EventSurfaces, NowPlayingSink};
use crate::playlist::PlaylistManager;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use stillpoint_common::{
    LifecycleEvent, NowPlaying, PlayerEvent, PlayerState, PositionUpdate, Track,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Dual-voice playback core
pub struct PlaybackCore {
    pub(crate) host: Arc<dyn AudioHost>,
    pub(crate) fade: FadeEngine,
    pub(crate) config: RwLock<PlayerConfig>,
    pub(crate) lifecycle: Mutex<PlayerState>,
    pub(crate) playlist: tokio::sync::Mutex<PlaylistManager>,
    pub(crate) voices: tokio::sync::Mutex<VoicePair>,
    pub(crate) session: Mutex<Option<CrossfadeSession>>,
    pub(crate) frozen: Mutex<Option<FrozenCrossfade>>,
    pub(crate) surfaces: Arc<EventSurfaces>,
    pub(crate) sink: Arc<dyn NowPlayingSink>,
    pub(crate) crossfade_ids: AtomicU64,
    pub(crate) last_skip: Mutex<Option<Instant>>,
    /// Cancels background transport fades (start fade-in, finish fade-out)
    pub(crate) transport_cancel: Mutex<CancelFlag>,
    /// Set while the end-of-playlist fade-out is running
    pub(crate) finishing: AtomicBool,
}

impl PlaybackCore {
    pub fn new(
        host: Arc<dyn AudioHost>,
        config: PlayerConfig,
        surfaces: Arc<EventSurfaces>,
        sink: Arc<dyn NowPlayingSink>,
    ) -> Arc<Self> {
        host.set_gain(Gain::Master, config.volume());
        host.set_gain(Gain::VoiceA, 0.0);
        host.set_gain(Gain::VoiceB, 0.0);

        let core = Arc::new(Self {
            fade: FadeEngine::new(host.clone()),
            host,
            config: RwLock::new(config),
            lifecycle: Mutex::new(PlayerState::Idle),
            playlist: tokio::sync::Mutex::new(PlaylistManager::new()),
            voices: tokio::sync::Mutex::new(VoicePair::default()),
            session: Mutex::new(None),
            frozen: Mutex::new(None),
            surfaces,
            sink,
            crossfade_ids: AtomicU64::new(1),
            last_skip: Mutex::new(None),
            transport_cancel: Mutex::new(CancelFlag::new()),
            finishing: AtomicBool::new(false),
        });
        super::ticker::spawn(&core);
        core
    }

    pub fn state(&self) -> PlayerState {
        *self.lifecycle.lock().unwrap()
    }

    pub fn configuration(&self) -> PlayerConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace configuration; volume and master gain follow immediately
    pub fn update_configuration(&self, config: PlayerConfig) {
        self.host.set_gain(Gain::Master, config.volume());
        *self.config.write().unwrap() = config;
    }

    pub fn surfaces(&self) -> &Arc<EventSurfaces> {
        &self.surfaces
    }

    /// Apply a lifecycle event, rejecting pairs the table forbids
    ///
    /// The state surface is updated before the bus event so subscribers
    /// always see the transition before anything describing the new state.
    pub(crate) fn apply_lifecycle(
        &self,
        operation: &str,
        event: LifecycleEvent,
    ) -> Result<(PlayerState, PlayerState)> {
        let (old_state, new_state) = {
            let mut state = self.lifecycle.lock().unwrap();
            let old_state = *state;
            let new_state = old_state
                .transition(event)
                .ok_or_else(|| Error::invalid_state(operation, old_state))?;
            *state = new_state;
            (old_state, new_state)
        };

        if old_state != new_state {
            debug!(%old_state, %new_state, ?event, "lifecycle transition");
        }
        self.surfaces.emit_state(new_state);
        self.surfaces.emit_event(PlayerEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
        Ok((old_state, new_state))
    }

    /// Best-effort lifecycle event for internal paths; ignored when illegal
    pub(crate) fn try_lifecycle(&self, operation: &str, event: LifecycleEvent) {
        let _ = self.apply_lifecycle(operation, event);
    }

    /// Report a failure and, when it interrupts playback, fail the lifecycle
    pub(crate) fn fail_with(&self, operation: &str, err: &Error) {
        warn!(%operation, %err, "operation failed");
        self.surfaces.emit_event(PlayerEvent::PlaybackError {
            operation: operation.to_string(),
            message: err.to_string(),
            timestamp: chrono::Utc::now(),
        });
        if err.fails_playback() {
            self.try_lifecycle(operation, LifecycleEvent::Error);
        }
    }

    /// Load `track` into a voice slot, resolving its duration
    pub(crate) async fn prepare_slot(
        &self,
        pair: &mut VoicePair,
        which: WhichVoice,
        index: usize,
        track: &Track,
    ) -> Result<Duration> {
        let loaded = self.host.load(which.voice(), &track.source).await?;
        let duration = loaded.duration;
        let slot = pair.slot_mut(which);
        slot.loaded = Some(loaded);
        slot.playlist_index = Some(index);
        slot.started_at = None;
        slot.offset = Duration::ZERO;
        slot.paused_position = None;
        debug!(?which, index, ?duration, "voice prepared");
        Ok(duration)
    }

    /// Position and duration of the active voice
    pub async fn position(&self) -> Option<PositionUpdate> {
        let pair = self.voices.lock().await;
        let slot = pair.active_slot();
        let position = slot.position(self.host.as_ref())?;
        let duration = slot.duration();
        // Clamp to the track end so the tail of a crossfade never reports
        // past-the-end positions
        let position = match duration {
            Some(total) => position.min(total),
            None => position,
        };
        Some(PositionUpdate { position, duration })
    }

    /// The track on the active voice, or the playlist cursor's track when
    /// nothing is audible yet (freshly loaded, stopped)
    pub async fn current_track(&self) -> Option<Track> {
        let index = {
            let pair = self.voices.lock().await;
            pair.active_slot().playlist_index
        };
        let playlist = self.playlist.lock().await;
        match index {
            Some(index) => playlist.track_at(index).cloned(),
            None => playlist.current().cloned(),
        }
    }

    pub async fn playlist_snapshot(&self) -> Vec<Track> {
        self.playlist.lock().await.tracks().to_vec()
    }

    /// Swap in a fresh cancel flag, cancelling outstanding transport fades
    pub(crate) fn renew_transport_cancel(&self) -> CancelFlag {
        let mut guard = self.transport_cancel.lock().unwrap();
        guard.cancel();
        let fresh = CancelFlag::new();
        *guard = fresh.clone();
        fresh
    }

    pub(crate) fn cancel_transport_fades(&self) {
        self.transport_cancel.lock().unwrap().cancel();
    }

    /// Push a now-playing snapshot to the metadata sink
    pub(crate) async fn push_now_playing(&self) {
        let playing = self.state() == PlayerState::Playing;
        let track = self.current_track().await;
        let position = self.position().await;
        let snapshot = NowPlaying {
            title: track.as_ref().and_then(|t| t.metadata.title.clone()),
            artist: track.as_ref().and_then(|t| t.metadata.artist.clone()),
            artwork: track.as_ref().and_then(|t| t.metadata.artwork.clone()),
            duration: position.as_ref().and_then(|p| p.duration),
            elapsed: position.map(|p| p.position).unwrap_or_default(),
            playback_rate: if playing { 1.0 } else { 0.0 },
        };
        self.sink.update(snapshot);
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Rebuild both voices after the host lost its state
    ///
    /// Reloads the current track, seeks to the last known position, and
    /// resumes when playback was running. Two failed attempts move the
    /// lifecycle to `Failed`.
    pub async fn recover_from_reset(&self) -> Result<()> {
        let was_playing = self.state() == PlayerState::Playing;
        info!(was_playing, "host engine reset: starting recovery");

        // Freeze the books: drop any in-flight crossfade, remember where
        // the listener was.
        self.cancel_transport_fades();
        if let Some(session) = self.session.lock().unwrap().take() {
            session.cancel.cancel();
        }
        let (index, last_position) = {
            let pair = self.voices.lock().await;
            let slot = pair.active_slot();
            (
                slot.playlist_index,
                slot.position(self.host.as_ref()).unwrap_or_default(),
            )
        };
        let Some(index) = index else {
            // Nothing was loaded; nothing to restore
            return Ok(());
        };

        self.try_lifecycle("recover", LifecycleEvent::Load);

        for attempt in 1..=2u32 {
            match self.try_restore(index, last_position, was_playing).await {
                Ok(()) => {
                    self.surfaces.emit_event(PlayerEvent::RecoveryAttempted {
                        attempt,
                        succeeded: true,
                        timestamp: chrono::Utc::now(),
                    });
                    if was_playing {
                        self.try_lifecycle("recover", LifecycleEvent::Start);
                    }
                    info!(attempt, "recovery succeeded");
                    return Ok(());
                }
                Err(err) => {
                    self.surfaces.emit_event(PlayerEvent::RecoveryAttempted {
                        attempt,
                        succeeded: false,
                        timestamp: chrono::Utc::now(),
                    });
                    warn!(attempt, %err, "recovery attempt failed");
                }
            }
        }

        let err = Error::HostEngineReset;
        self.fail_with("recover", &err);
        Err(err)
    }

    async fn try_restore(
        &self,
        index: usize,
        position: Duration,
        resume: bool,
    ) -> Result<()> {
        let track = {
            let playlist = self.playlist.lock().await;
            playlist.track_at(index).cloned().ok_or(Error::NoTrackLoaded)?
        };

        let mut pair = self.voices.lock().await;
        self.host.unload(WhichVoice::A.voice());
        self.host.unload(WhichVoice::B.voice());
        pair.a.clear();
        pair.b.clear();

        let active = pair.active;
        self.prepare_slot(&mut pair, active, index, &track).await?;
        self.host.set_gain(active.other().gain(), 0.0);
        self.host
            .set_gain(Gain::Master, self.config.read().unwrap().volume());

        if resume {
            let at_frame = self.host.render_time_now() + self.host.lead_frames();
            self.host.schedule(active.voice(), at_frame, position).await?;
            let slot = pair.slot_mut(active);
            slot.started_at = Some(at_frame);
            slot.offset = position;
            slot.paused_position = None;
            self.host.set_gain(active.gain(), 1.0);
        } else {
            let slot = pair.slot_mut(active);
            slot.paused_position = Some(position);
            slot.started_at = None;
        }
        Ok(())
    }

    /// Self-heal after an external route/session change
    ///
    /// While playing, replays from the last known position through the
    /// usual seek-with-fade, so the disturbance is audible only as the
    /// short fade at the seek point.
    pub async fn handle_route_change(self: &Arc<Self>) -> Result<()> {
        if self.state() != PlayerState::Playing {
            return Ok(());
        }
        let Some(update) = self.position().await else {
            return Ok(());
        };
        warn!("external session change: re-seating playback");
        self.seek(update.position, crate::config::SEEK_FADE_DEFAULT)
            .await?;
        self.surfaces.emit_event(PlayerEvent::RecoveryAttempted {
            attempt: 1,
            succeeded: true,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }
}
