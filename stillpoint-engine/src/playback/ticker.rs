//! Position tick and auto-advance
//!
//! A 2 Hz tick driven off the host's render clock publishes position while
//! playing and watches for the loop/advance boundary: when the remaining
//! time falls inside the adapted crossfade window and no crossfade is in
//! flight, the playlist decides what plays next. A concrete next track
//! starts the boundary crossfade; `Finish` starts the end-of-playlist
//! master fade-out instead.

use super::PlaybackCore;
use crate::host::Gain;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use stillpoint_common::{LifecycleEvent, PlayerEvent, PlayerState};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Position/boundary tick period: 2 Hz
pub(super) const TICK_PERIOD: Duration = Duration::from_millis(500);

/// Spawn the tick loop; it exits when the core is dropped
pub(super) fn spawn(core: &Arc<PlaybackCore>) {
    let weak: Weak<PlaybackCore> = Arc::downgrade(core);
    tokio::spawn(async move {
        let mut ticker = interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(core) = weak.upgrade() else { break };
            core.tick().await;
        }
    });
}

impl PlaybackCore {
    /// One position/boundary evaluation
    pub(crate) async fn tick(self: &Arc<Self>) {
        if self.state() != PlayerState::Playing {
            return;
        }
        let Some(update) = self.position().await else {
            return;
        };
        self.surfaces.emit_position(update);
        self.push_now_playing().await;

        let Some(duration) = update.duration else {
            return;
        };
        let remaining = duration.saturating_sub(update.position);
        let effective = self.effective_crossfade(duration);

        // Trigger predicate: inside the fade window, nothing in flight,
        // still playing
        if remaining > effective {
            return;
        }
        if self.session.lock().unwrap().is_some() {
            return;
        }
        if self.finishing.load(Ordering::SeqCst) {
            return;
        }

        let (mode, limit) = {
            let config = self.config.read().unwrap();
            (config.repeat_mode(), config.repeat_limit())
        };
        let decision = self.playlist.lock().await.advance(mode, limit);
        debug!(?decision, ?remaining, ?effective, "advance boundary");

        match decision.target() {
            Some(target_index) => {
                // Keep the envelope inside what is left of the track
                let crossfade = remaining.min(effective);
                let _ = self.begin_crossfade(target_index, crossfade).await;
            }
            None => self.begin_finish(remaining).await,
        }
    }

    /// End of playlist: fade the master over the remaining window, let the
    /// voice play out, then finish
    async fn begin_finish(self: &Arc<Self>, remaining: Duration) {
        if self.finishing.swap(true, Ordering::SeqCst) {
            return;
        }
        if self
            .apply_lifecycle("finish", LifecycleEvent::Stop)
            .is_err()
        {
            self.finishing.store(false, Ordering::SeqCst);
            return;
        }
        info!(?remaining, "playlist complete: fading out");
        self.spawn_finish_fade(remaining);
    }

    /// Drive the master to silence over `remaining`, then stop the voices
    /// and land in `Finished`
    ///
    /// Called at the finish boundary and again by `resume` when a pause
    /// froze this fade partway; the frozen master level is picked up as
    /// the ramp's starting point, so the fade continues rather than
    /// restarting.
    pub(crate) fn spawn_finish_fade(self: &Arc<Self>, remaining: Duration) {
        let cancel = self.renew_transport_cancel();
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let curve = core.config.read().unwrap().fade_curve();
            let from = core.host.gain(Gain::Master);
            let outcome = core
                .fade
                .fade(Gain::Master, from, 0.0, remaining, curve, &cancel)
                .await;
            if !outcome.is_completed() {
                return;
            }

            let mut pair = core.voices.lock().await;
            let finished_track = pair
                .active_slot()
                .loaded
                .as_ref()
                .map(|loaded| loaded.track.id);
            for which in [super::WhichVoice::A, super::WhichVoice::B] {
                core.host.stop_voice(which.voice());
                core.host.unload(which.voice());
                core.host.set_gain(which.gain(), 0.0);
                pair.slot_mut(which).clear();
            }
            drop(pair);

            core.finishing.store(false, Ordering::SeqCst);
            core.try_lifecycle("finish", LifecycleEvent::FadeOutDone);
            if let Some(track_id) = finished_track {
                core.surfaces.emit_event(PlayerEvent::TrackFinished {
                    track_id,
                    completed: true,
                    timestamp: chrono::Utc::now(),
                });
            }
            core.push_now_playing().await;
            info!("finished");
        });
    }
}
