//! Crossfade sessions and the envelope driver
//!
//! A crossfade schedules the incoming voice sample-accurately at
//! `render_time_now + lead_frames`, installs a session record (at most one
//! may exist), and spawns a driver task that runs the paired envelopes and
//! performs the atomic active-voice swap at completion. Commands return as
//! soon as the crossfade is rolling; cancellation is cooperative and the
//! canceller owns whatever cleanup its semantics need.

use super::{CrossfadeSession, FrozenCrossfade, PlaybackCore, VoicePair, WhichVoice};
use crate::config::adapted_crossfade;
use crate::error::{Error, Result};
use crate::fade::{CancelFlag, FadeOutcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use stillpoint_common::{
    CrossfadePhase, CrossfadeProgress, FadeCurve, LifecycleEvent, PlayerEvent,
};
use tracing::{debug, info};

/// Read-only view of the in-flight crossfade
#[derive(Debug, Clone, Copy)]
pub struct CrossfadeSnapshot {
    pub id: u64,
    pub progress: f32,
    pub duration: Duration,
}

impl PlaybackCore {
    /// Snapshot of the in-flight crossfade, if any
    pub fn active_crossfade(&self) -> Option<CrossfadeSnapshot> {
        let guard = self.session.lock().unwrap();
        guard.as_ref().map(|session| CrossfadeSnapshot {
            id: session.id,
            progress: session.progress(self.host.as_ref()),
            duration: session.duration,
        })
    }

    /// Crossfade duration adapted to the track being left
    pub(crate) fn effective_crossfade(&self, track_duration: Duration) -> Duration {
        adapted_crossfade(self.config.read().unwrap().crossfade(), track_duration)
    }

    /// Cancel the in-flight crossfade, leaving gains where they are
    ///
    /// Returns the frozen state (progress and remaining time) so pause can
    /// resume the fade later. When `stop_incoming` is set the half-faded
    /// incoming voice is silenced and unloaded, which is what swap and
    /// skip want, where a different target follows immediately.
    pub(crate) fn cancel_session_locked(
        &self,
        pair: &mut VoicePair,
        stop_incoming: bool,
    ) -> Option<FrozenCrossfade> {
        let session = self.session.lock().unwrap().take()?;
        let progress = session.progress(self.host.as_ref());
        session.cancel.cancel();

        let remaining = session.duration.mul_f64(
            ((1.0 - progress) / (1.0 - session.start_progress).max(f32::EPSILON)) as f64,
        );
        info!(
            id = session.id,
            progress, ?remaining, stop_incoming, "crossfade cancelled"
        );

        if stop_incoming {
            self.host.stop_voice(session.to.voice());
            self.host.unload(session.to.voice());
            pair.slot_mut(session.to).clear();
        }

        self.surfaces.emit_event(PlayerEvent::CrossfadeCancelled {
            crossfade_id: session.id,
            timestamp: chrono::Utc::now(),
        });
        self.surfaces.emit_crossfade(CrossfadeProgress {
            id: session.id,
            phase: CrossfadePhase::Idle,
        });

        Some(FrozenCrossfade {
            id: session.id,
            from: session.from,
            to: session.to,
            progress,
            remaining,
            curve: session.curve,
        })
    }

    /// Start a crossfade from the active voice to `target_index`
    ///
    /// The incoming voice starts from frame 0 of its track at crossfade
    /// start; callers must have cancelled any previous session first.
    pub(crate) async fn begin_crossfade(
        self: &Arc<Self>,
        target_index: usize,
        duration: Duration,
    ) -> Result<u64> {
        let track = {
            let playlist = self.playlist.lock().await;
            playlist
                .track_at(target_index)
                .cloned()
                .ok_or(Error::IndexOutOfRange {
                    index: target_index,
                    len: playlist.len(),
                })?
        };

        let curve = self.config.read().unwrap().fade_curve();
        let id = self.crossfade_ids.fetch_add(1, Ordering::SeqCst);

        let mut pair = self.voices.lock().await;
        let from = pair.active;
        let to = pair.inactive();

        self.surfaces.emit_crossfade(CrossfadeProgress {
            id,
            phase: CrossfadePhase::Preparing,
        });

        let needs_load = pair.slot(to).playlist_index != Some(target_index)
            || pair.slot(to).loaded.is_none();
        let resolved = if needs_load {
            match self.prepare_slot(&mut pair, to, target_index, &track).await {
                Ok(duration) => Some(duration),
                Err(err) => {
                    self.surfaces.emit_crossfade(CrossfadeProgress {
                        id,
                        phase: CrossfadePhase::Idle,
                    });
                    drop(pair);
                    self.fail_with("crossfade", &err);
                    return Err(err);
                }
            }
        } else {
            None
        };

        let start_frame = self.host.render_time_now() + self.host.lead_frames();
        self.host.set_gain(to.gain(), 0.0);
        if let Err(host_err) = self
            .host
            .schedule(to.voice(), start_frame, Duration::ZERO)
            .await
        {
            let err = Error::from(host_err);
            drop(pair);
            self.fail_with("crossfade", &err);
            return Err(err);
        }
        {
            let slot = pair.slot_mut(to);
            slot.started_at = Some(start_frame);
            slot.offset = Duration::ZERO;
            slot.paused_position = None;
        }

        let from_track = pair
            .slot(from)
            .loaded
            .as_ref()
            .map(|loaded| loaded.track.id);
        let cancel = CancelFlag::new();
        *self.session.lock().unwrap() = Some(CrossfadeSession {
            id,
            from,
            to,
            duration,
            started_at_frame: start_frame,
            curve,
            cancel: cancel.clone(),
            start_progress: 0.0,
        });
        drop(pair);

        if let Some(resolved) = resolved {
            self.playlist
                .lock()
                .await
                .set_track_duration(target_index, resolved);
        }

        self.surfaces.emit_event(PlayerEvent::CrossfadeStarted {
            crossfade_id: id,
            from_track,
            to_track: track.id,
            duration,
            timestamp: chrono::Utc::now(),
        });
        debug!(id, ?duration, target_index, start_frame, "crossfade started");

        self.spawn_driver(id, from, to, duration, curve, 0.0, cancel);
        Ok(id)
    }

    /// Resume a frozen crossfade with its remaining duration
    pub(crate) fn resume_crossfade(self: &Arc<Self>, frozen: FrozenCrossfade) {
        let started_at_frame = self.host.render_time_now();
        let cancel = CancelFlag::new();
        *self.session.lock().unwrap() = Some(CrossfadeSession {
            id: frozen.id,
            from: frozen.from,
            to: frozen.to,
            duration: frozen.remaining,
            started_at_frame,
            curve: frozen.curve,
            cancel: cancel.clone(),
            start_progress: frozen.progress,
        });

        info!(
            id = frozen.id,
            progress = frozen.progress,
            remaining = ?frozen.remaining,
            "crossfade resumed"
        );
        self.spawn_driver(
            frozen.id,
            frozen.from,
            frozen.to,
            frozen.remaining,
            frozen.curve,
            frozen.progress,
            cancel,
        );
    }

    fn spawn_driver(
        self: &Arc<Self>,
        id: u64,
        from: WhichVoice,
        to: WhichVoice,
        duration: Duration,
        curve: FadeCurve,
        start_progress: f32,
        cancel: CancelFlag,
    ) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let surfaces = core.surfaces.clone();
            let outcome = core
                .fade
                .crossfade(
                    from.gain(),
                    to.gain(),
                    duration,
                    curve,
                    start_progress,
                    &cancel,
                    |progress| {
                        surfaces.emit_crossfade(CrossfadeProgress {
                            id,
                            phase: CrossfadePhase::Fading { progress },
                        });
                    },
                )
                .await;

            match outcome {
                FadeOutcome::Completed => core.finish_crossfade(id).await,
                FadeOutcome::Cancelled { .. } => {
                    // The canceller already took the session and decided
                    // what happens to the voices.
                }
            }
        });
    }

    /// Completion: stop the outgoing voice and swap the active pointer
    ///
    /// The swap happens under the voices lock, so position and track
    /// readers observe old-track state until the moment both change
    /// together.
    async fn finish_crossfade(self: &Arc<Self>, id: u64) {
        let mut pair = self.voices.lock().await;

        let session = {
            let mut guard = self.session.lock().unwrap();
            match guard.as_ref() {
                Some(session) if session.id == id && !session.cancel.is_cancelled() => {
                    guard.take()
                }
                _ => None,
            }
        };
        let Some(session) = session else {
            // A cancel raced us between the last tick and completion
            return;
        };

        self.surfaces.emit_crossfade(CrossfadeProgress {
            id,
            phase: CrossfadePhase::Switching,
        });

        let old_track = pair
            .slot(session.from)
            .loaded
            .as_ref()
            .map(|loaded| loaded.track.id);
        self.host.stop_voice(session.from.voice());
        self.host.unload(session.from.voice());
        pair.slot_mut(session.from).clear();
        pair.active = session.to;
        let new_index = pair.slot(session.to).playlist_index;
        drop(pair);

        self.surfaces.emit_crossfade(CrossfadeProgress {
            id,
            phase: CrossfadePhase::Cleanup,
        });

        let new_track = match new_index {
            Some(index) => self.playlist.lock().await.track_at(index).cloned(),
            None => None,
        };

        if let Some(track_id) = old_track {
            self.surfaces.emit_event(PlayerEvent::TrackFinished {
                track_id,
                completed: true,
                timestamp: chrono::Utc::now(),
            });
        }
        if let Some(track) = new_track {
            // Track surface first, then position naturally restarts at the
            // new voice's zero on the next tick
            self.surfaces.emit_track(track.clone());
            self.surfaces.emit_event(PlayerEvent::TrackStarted {
                track_id: track.id,
                title: track.metadata.title.clone(),
                timestamp: chrono::Utc::now(),
            });
        }

        self.surfaces.emit_event(PlayerEvent::CrossfadeCompleted {
            crossfade_id: id,
            timestamp: chrono::Utc::now(),
        });
        self.surfaces.emit_crossfade(CrossfadeProgress {
            id,
            phase: CrossfadePhase::Idle,
        });
        self.try_lifecycle("advance", LifecycleEvent::AdvanceComplete);
        self.push_now_playing().await;
        debug!(id, "crossfade completed");
    }
}
