//! Transport operations: start, pause, resume, stop, seek, skips
//!
//! Every method here is called from the operation queue worker, one at a
//! time. Long envelopes (crossfades, start fade-in, finish fade-out) run
//! in background tasks so the queue stays responsive; the short seek
//! fades are awaited inline.

use super::{PlaybackCore, WhichVoice};
use crate::config::SEEK_FADE_DEFAULT;
use crate::error::{Error, Result};
use crate::host::Gain;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use stillpoint_common::{LifecycleEvent, PlayerEvent, PlayerState, PositionUpdate, Track};
use tokio::time::Instant;
use tracing::{debug, info};

/// Ramp used when resuming from pause outside a frozen crossfade
const RESUME_FADE: Duration = Duration::from_millis(500);

/// Minimum spacing between user skips
const SKIP_RATE_LIMIT: Duration = Duration::from_millis(500);

impl PlaybackCore {
    /// Replace the playlist and prepare its head track
    ///
    /// The head is loaded into the currently-inactive voice; the active
    /// voice is silenced. Playback does not start until `start_playing`.
    pub async fn load_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        self.apply_lifecycle("load_playlist", LifecycleEvent::Load)?;
        self.cancel_transport_fades();
        self.finishing.store(false, Ordering::SeqCst);

        let head = tracks[0].clone();
        let count = tracks.len();
        self.playlist.lock().await.load(tracks)?;

        let mut pair = self.voices.lock().await;
        let _ = self.cancel_session_locked(&mut pair, true);
        for which in [WhichVoice::A, WhichVoice::B] {
            self.host.stop_voice(which.voice());
            self.host.unload(which.voice());
            self.host.set_gain(which.gain(), 0.0);
            pair.slot_mut(which).clear();
        }

        let target = pair.inactive();
        let resolved = self.prepare_slot(&mut pair, target, 0, &head).await?;
        drop(pair);
        self.playlist.lock().await.set_track_duration(0, resolved);

        self.surfaces.emit_event(PlayerEvent::PlaylistLoaded {
            track_count: count,
            timestamp: chrono::Utc::now(),
        });
        self.surfaces.emit_track(head);
        info!(count, "playlist loaded and head prepared");
        Ok(())
    }

    /// Begin playback of the current track with a fade-in
    ///
    /// `None` uses the configured default (30% of the crossfade duration).
    /// Calling this while paused resumes instead.
    pub async fn start_playing(self: &Arc<Self>, fade_in: Option<Duration>) -> Result<()> {
        if self.state() == PlayerState::Paused {
            return self.resume().await;
        }
        if self.playlist.lock().await.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        self.apply_lifecycle("start_playing", LifecycleEvent::Start)?;

        let (fade_in, curve, volume) = {
            let config = self.config.read().unwrap();
            (
                fade_in.unwrap_or_else(|| config.fade_in_default()),
                config.fade_curve(),
                config.volume(),
            )
        };

        let (index, track) = {
            let playlist = self.playlist.lock().await;
            let track = playlist.current().cloned().ok_or(Error::NoTrackLoaded)?;
            (playlist.current_index(), track)
        };

        let mut pair = self.voices.lock().await;
        let inactive = pair.inactive();
        let target = if pair.slot(inactive).playlist_index == Some(index) {
            inactive
        } else if pair.slot(pair.active).playlist_index == Some(index) {
            pair.active
        } else {
            match self.prepare_slot(&mut pair, inactive, index, &track).await {
                Ok(_) => inactive,
                Err(err) => {
                    drop(pair);
                    self.fail_with("start_playing", &err);
                    return Err(err);
                }
            }
        };

        pair.active = target;
        self.host.set_gain(target.gain(), 0.0);
        self.host.set_gain(target.other().gain(), 0.0);
        self.host.set_gain(Gain::Master, volume);

        let at_frame = self.host.render_time_now() + self.host.lead_frames();
        if let Err(host_err) = self
            .host
            .schedule(target.voice(), at_frame, Duration::ZERO)
            .await
        {
            drop(pair);
            let err = Error::from(host_err);
            self.fail_with("start_playing", &err);
            return Err(err);
        }
        {
            let slot = pair.slot_mut(target);
            slot.started_at = Some(at_frame);
            slot.offset = Duration::ZERO;
            slot.paused_position = None;
        }
        drop(pair);

        if self.state() == PlayerState::Preparing {
            self.apply_lifecycle("start_playing", LifecycleEvent::Start)?;
        }
        self.finishing.store(false, Ordering::SeqCst);

        // Fade in from silence in the background; the command returns once
        // playback is rolling
        let cancel = self.renew_transport_cancel();
        let gain = target.gain();
        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.fade.fade(gain, 0.0, 1.0, fade_in, curve, &cancel).await;
        });

        self.surfaces.emit_track(track.clone());
        self.surfaces.emit_event(PlayerEvent::TrackStarted {
            track_id: track.id,
            title: track.metadata.title.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.push_now_playing().await;
        info!(index, fade_in_ms = fade_in.as_millis() as u64, "playback started");
        Ok(())
    }

    /// Pause both voices, freezing any in-flight crossfade
    ///
    /// Legal from Playing and from FadingOut: pausing during the
    /// end-of-playlist fade-out freezes the master at its current level
    /// and `resume` continues the fade from there.
    pub async fn pause(&self) -> Result<()> {
        self.apply_lifecycle("pause", LifecycleEvent::Pause)?;
        self.cancel_transport_fades();

        let mut pair = self.voices.lock().await;
        if let Some(frozen) = self.cancel_session_locked(&mut pair, false) {
            debug!(
                id = frozen.id,
                progress = frozen.progress,
                "crossfade frozen across pause"
            );
            *self.frozen.lock().unwrap() = Some(frozen);
        }

        for which in [WhichVoice::A, WhichVoice::B] {
            let position = pair.slot(which).position(self.host.as_ref());
            let slot = pair.slot_mut(which);
            if slot.started_at.is_some() {
                self.host.pause_voice(which.voice());
                slot.paused_position = position;
                slot.started_at = None;
            }
        }
        drop(pair);
        self.push_now_playing().await;
        info!("paused");
        Ok(())
    }

    /// Resume from pause; a frozen crossfade continues with its remaining
    /// duration from the frozen gains
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        self.apply_lifecycle("resume", LifecycleEvent::Resume)?;

        let mut pair = self.voices.lock().await;
        let active = pair.active;
        for which in [WhichVoice::A, WhichVoice::B] {
            let slot = pair.slot(which);
            let Some(position) = slot.paused_position else {
                continue;
            };
            if slot.loaded.is_none() {
                continue;
            }
            // Reschedule rather than resume: seek-while-paused may have
            // moved the target position out from under the host
            self.host.stop_voice(which.voice());
            let at_frame = self.host.render_time_now() + self.host.lead_frames();
            if let Err(host_err) = self.host.schedule(which.voice(), at_frame, position).await {
                drop(pair);
                let err = Error::from(host_err);
                self.fail_with("resume", &err);
                return Err(err);
            }
            let slot = pair.slot_mut(which);
            slot.started_at = Some(at_frame);
            slot.offset = position;
            slot.paused_position = None;
        }
        drop(pair);

        let frozen = self.frozen.lock().unwrap().take();
        if let Some(frozen) = frozen {
            self.resume_crossfade(frozen);
        } else if self.finishing.load(Ordering::SeqCst) {
            // The pause interrupted the end-of-playlist fade-out; continue
            // it from the frozen master level over what is left of the
            // track
            let remaining = match self.position().await {
                Some(update) => update
                    .duration
                    .map(|total| total.saturating_sub(update.position))
                    .unwrap_or(Duration::ZERO),
                None => Duration::ZERO,
            };
            self.try_lifecycle("finish", LifecycleEvent::Stop);
            info!(?remaining, "resumed into fade-out");
            self.spawn_finish_fade(remaining);
        } else {
            // A pause mid fade-in leaves the gain partway up; ramp it home
            let gain = active.gain();
            let current = self.host.gain(gain);
            if current < 1.0 {
                let curve = self.config.read().unwrap().fade_curve();
                let cancel = self.renew_transport_cancel();
                let core = Arc::clone(self);
                tokio::spawn(async move {
                    core.fade.fade(gain, current, 1.0, RESUME_FADE, curve, &cancel).await;
                });
            }
        }

        self.push_now_playing().await;
        info!("resumed");
        Ok(())
    }

    /// Fade the master out and stop everything
    ///
    /// A zero duration is an immediate hard stop. Stop on `Finished` is a
    /// legal no-op, which makes stop idempotent.
    pub async fn stop(&self, fade_out: Duration) -> Result<()> {
        let state = self.state();
        if state == PlayerState::Finished {
            self.apply_lifecycle("stop", LifecycleEvent::Stop)?;
            return Ok(());
        }

        self.cancel_transport_fades();
        self.finishing.store(false, Ordering::SeqCst);
        {
            let mut pair = self.voices.lock().await;
            let _ = self.cancel_session_locked(&mut pair, false);
        }
        *self.frozen.lock().unwrap() = None;

        if state == PlayerState::Playing && !fade_out.is_zero() {
            self.apply_lifecycle("stop", LifecycleEvent::Stop)?;
            let curve = self.config.read().unwrap().fade_curve();
            let from = self.host.gain(Gain::Master);
            let cancel = self.renew_transport_cancel();
            self.fade
                .fade(Gain::Master, from, 0.0, fade_out, curve, &cancel)
                .await;
            self.try_lifecycle("stop", LifecycleEvent::FadeOutDone);
        } else {
            self.apply_lifecycle("stop", LifecycleEvent::Stop)?;
            // A zero-duration stop from Playing passes through FadingOut
            if self.state() == PlayerState::FadingOut {
                self.try_lifecycle("stop", LifecycleEvent::FadeOutDone);
            }
        }

        let mut pair = self.voices.lock().await;
        let stopped_track = pair
            .active_slot()
            .loaded
            .as_ref()
            .map(|loaded| loaded.track.id);
        for which in [WhichVoice::A, WhichVoice::B] {
            self.host.stop_voice(which.voice());
            self.host.unload(which.voice());
            self.host.set_gain(which.gain(), 0.0);
            pair.slot_mut(which).clear();
        }
        drop(pair);
        self.host.set_gain(Gain::Master, 0.0);

        if let Some(track_id) = stopped_track {
            self.surfaces.emit_event(PlayerEvent::TrackFinished {
                track_id,
                completed: false,
                timestamp: chrono::Utc::now(),
            });
        }
        self.push_now_playing().await;
        info!(fade_out_ms = fade_out.as_millis() as u64, "stopped");
        Ok(())
    }

    /// Seek within the current track using a two-sided fade
    ///
    /// The fade time is split across the fade-out and fade-in halves, so
    /// the jump itself lands in silence and no click is audible.
    pub async fn seek(self: &Arc<Self>, to: Duration, fade: Duration) -> Result<()> {
        let state = self.state();
        if !matches!(state, PlayerState::Playing | PlayerState::Paused) {
            return Err(Error::invalid_state("seek", state));
        }

        let mut pair = self.voices.lock().await;
        let _ = self.cancel_session_locked(&mut pair, true);
        *self.frozen.lock().unwrap() = None;

        let active = pair.active;
        let duration = pair
            .slot(active)
            .duration()
            .ok_or(Error::NoTrackLoaded)?;
        let target = to.min(duration);

        if state == PlayerState::Paused {
            self.host.stop_voice(active.voice());
            let slot = pair.slot_mut(active);
            slot.paused_position = Some(target);
            slot.started_at = None;
            drop(pair);
        } else {
            let curve = self.config.read().unwrap().fade_curve();
            let cancel = self.renew_transport_cancel();
            let gain = active.gain();
            let half = fade / 2;
            let level = self.host.gain(gain);

            self.fade.fade(gain, level, 0.0, half, curve, &cancel).await;
            let at_frame = self.host.render_time_now() + self.host.lead_frames();
            if let Err(host_err) = self.host.schedule(active.voice(), at_frame, target).await {
                drop(pair);
                let err = Error::from(host_err);
                self.fail_with("seek", &err);
                return Err(err);
            }
            {
                let slot = pair.slot_mut(active);
                slot.started_at = Some(at_frame);
                slot.offset = target;
                slot.paused_position = None;
            }
            self.fade.fade(gain, 0.0, level, half, curve, &cancel).await;
            drop(pair);
        }

        self.surfaces.emit_event(PlayerEvent::Seeked {
            position: target,
            timestamp: chrono::Utc::now(),
        });
        self.surfaces.emit_position(PositionUpdate {
            position: target,
            duration: Some(duration),
        });
        self.push_now_playing().await;
        debug!(?target, "seek complete");
        Ok(())
    }

    /// Jump forward by `interval`, clamped to the track end
    pub async fn skip_forward(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let update = self.position().await.ok_or(Error::NoTrackLoaded)?;
        self.seek(update.position + interval, SEEK_FADE_DEFAULT).await
    }

    /// Jump backward by `interval`, clamped to the track start
    pub async fn skip_backward(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let update = self.position().await.ok_or(Error::NoTrackLoaded)?;
        self.seek(update.position.saturating_sub(interval), SEEK_FADE_DEFAULT)
            .await
    }

    /// Crossfade to the following playlist entry (user intent; repeat
    /// rules do not apply). Rate limited to one skip per 500 ms.
    pub async fn skip_to_next(self: &Arc<Self>) -> Result<()> {
        self.check_skip_rate()?;
        self.navigate(|playlist| playlist.skip_to_next().map(|_| ()))
            .await
    }

    /// Crossfade to the preceding playlist entry
    pub async fn skip_to_previous(self: &Arc<Self>) -> Result<()> {
        self.check_skip_rate()?;
        self.navigate(|playlist| playlist.skip_to_previous().map(|_| ()))
            .await
    }

    /// Crossfade to an arbitrary playlist index
    pub async fn jump_to(self: &Arc<Self>, index: usize) -> Result<()> {
        self.check_skip_rate()?;
        self.navigate(move |playlist| playlist.jump_to(index).map(|_| ()))
            .await
    }

    async fn navigate<F>(self: &Arc<Self>, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut crate::playlist::PlaylistManager) -> Result<()>,
    {
        {
            let mut pair = self.voices.lock().await;
            let _ = self.cancel_session_locked(&mut pair, true);
        }

        let target_index = {
            let mut playlist = self.playlist.lock().await;
            mutate(&mut playlist)?;
            playlist.current_index()
        };

        if self.state() == PlayerState::Playing {
            let active_duration = {
                let pair = self.voices.lock().await;
                pair.active_slot().duration()
            };
            let duration = self.effective_crossfade(
                active_duration.unwrap_or_else(|| self.config.read().unwrap().crossfade()),
            );
            self.begin_crossfade(target_index, duration).await?;
        } else {
            // Not audible yet: prepare the target so the next start is instant
            let track = {
                let playlist = self.playlist.lock().await;
                playlist
                    .track_at(target_index)
                    .cloned()
                    .ok_or(Error::NoTrackLoaded)?
            };
            let mut pair = self.voices.lock().await;
            let slot = pair.inactive();
            self.prepare_slot(&mut pair, slot, target_index, &track).await?;
        }

        *self.last_skip.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    fn check_skip_rate(&self) -> Result<()> {
        let guard = self.last_skip.lock().unwrap();
        if let Some(last) = *guard {
            if last.elapsed() < SKIP_RATE_LIMIT {
                return Err(Error::RateLimited);
            }
        }
        Ok(())
    }

    /// Atomically replace the playlist
    ///
    /// While playing, the current crossfade (if any) is cancelled, its
    /// half-faded incoming voice is dropped, and a fresh crossfade runs
    /// from the audible voice to the new head. Otherwise this is
    /// equivalent to `load_playlist`.
    pub async fn swap_playlist(
        self: &Arc<Self>,
        tracks: Vec<Track>,
        crossfade: Duration,
    ) -> Result<()> {
        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        if self.state() != PlayerState::Playing {
            return self.load_playlist(tracks).await;
        }

        let crossfade = crossfade.clamp(
            Duration::from_secs_f64(crate::config::CROSSFADE_MIN_SECS),
            Duration::from_secs_f64(crate::config::CROSSFADE_MAX_SECS),
        );

        {
            let mut pair = self.voices.lock().await;
            let _ = self.cancel_session_locked(&mut pair, true);
        }
        let count = tracks.len();
        self.playlist.lock().await.load(tracks)?;
        self.finishing.store(false, Ordering::SeqCst);

        self.surfaces.emit_event(PlayerEvent::PlaylistSwapped {
            track_count: count,
            crossfade,
            timestamp: chrono::Utc::now(),
        });
        self.begin_crossfade(0, crossfade).await?;
        info!(count, "playlist swapped");
        Ok(())
    }

    /// Set the master volume; per-voice crossfade ramps are unaffected
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(Error::invalid_parameter("volume", "must be finite"));
        }
        let clamped = volume.clamp(0.0, 1.0);
        let old_volume = {
            let mut config = self.config.write().unwrap();
            let old = config.volume();
            config.set_volume(clamped);
            old
        };
        self.host.set_gain(Gain::Master, clamped);
        self.surfaces.emit_event(PlayerEvent::VolumeChanged {
            old_volume,
            new_volume: clamped,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Change the repeat mode; applies at the next advance decision
    pub fn set_repeat_mode(&self, mode: stillpoint_common::RepeatMode) {
        self.config.write().unwrap().set_repeat_mode(mode);
        self.surfaces.emit_event(PlayerEvent::RepeatModeChanged {
            mode,
            timestamp: chrono::Utc::now(),
        });
    }
}
