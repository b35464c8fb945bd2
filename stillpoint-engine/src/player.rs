//! Public player facade
//!
//! `Player` wires the playback core, overlay voice, operation queue,
//! session watcher, and event surfaces together. Every mutating call
//! becomes a queued command: the queue consults the lifecycle machine at
//! dispatch time and runs commands one at a time, so callers can hit the
//! API from anywhere without coordinating. Read-only accessors and the
//! event streams bypass the queue.

use crate::config::{OverlayConfig, PlayerConfig, SessionMode};
use crate::error::{Error, Result};
use crate::host::AudioHost;
use crate::ops::{Command, Gate, OpQueue, OpQueueStats, Priority};
use crate::overlay::OverlayPlayer;
use crate::playback::PlaybackCore;
use crate::session::{InterruptionEvent, NullSession, SessionAdapter};
use crate::surfaces::{EventSurfaces, NowPlayingSink, NullSink};
use std::sync::Arc;
use std::time::Duration;
use stillpoint_common::{
    CrossfadeProgress, LifecycleEvent, LogEntry, OverlayState, PlayerEvent, PlayerState,
    PositionUpdate, RepeatMode, Track, TrackMetadata,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

/// The playback engine's public control surface
pub struct Player {
    core: Arc<PlaybackCore>,
    overlay: Arc<OverlayPlayer>,
    queue: OpQueue,
    session: Arc<dyn SessionAdapter>,
    surfaces: Arc<EventSurfaces>,
}

impl Player {
    /// Build a player with no platform session handling and no metadata
    /// sink, the common embedding for tests and headless use
    pub async fn new(host: Arc<dyn AudioHost>, config: PlayerConfig) -> Result<Self> {
        Self::with_adapters(
            host,
            Arc::new(NullSession::new()),
            Arc::new(NullSink),
            config,
        )
        .await
    }

    /// Build a player with explicit session and now-playing adapters
    pub async fn with_adapters(
        host: Arc<dyn AudioHost>,
        session: Arc<dyn SessionAdapter>,
        sink: Arc<dyn NowPlayingSink>,
        config: PlayerConfig,
    ) -> Result<Self> {
        let surfaces = Arc::new(EventSurfaces::default());

        match config.session_mode() {
            SessionMode::Managed => {
                session
                    .configure(SessionMode::Managed, config.mix_with_others())
                    .await?;
                session.activate().await?;
            }
            SessionMode::External => {
                // The embedder owns the session; warn, never override
                if let Err(err) = session.validate() {
                    warn!(%err, "externally configured session failed validation");
                    surfaces.emit_event(PlayerEvent::SessionWarning {
                        message: format!("external session validation failed: {err}"),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }

        let core = PlaybackCore::new(host.clone(), config, surfaces.clone(), sink);
        let overlay = OverlayPlayer::new(host, surfaces.clone());
        spawn_session_watcher(core.clone(), overlay.clone(), session.clone());

        info!("player constructed");
        Ok(Self {
            core,
            overlay,
            queue: OpQueue::new(),
            session,
            surfaces,
        })
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn configuration(&self) -> PlayerConfig {
        self.core.configuration()
    }

    pub fn update_configuration(&self, config: PlayerConfig) {
        self.core.update_configuration(config);
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("set_volume", Priority::High),
                always_allowed(),
                move |_| Box::pin(async move { core.set_volume(volume) }),
            )
            .await
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("set_repeat_mode", Priority::Normal),
                always_allowed(),
                move |_| {
                    Box::pin(async move {
                        core.set_repeat_mode(mode);
                        Ok(())
                    })
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Playlist
    // ------------------------------------------------------------------

    pub async fn load_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("load_playlist", Priority::Normal),
                lifecycle_gate(self.core.clone(), "load_playlist", &[LifecycleEvent::Load]),
                move |_| Box::pin(async move { core.load_playlist(tracks).await }),
            )
            .await
    }

    pub async fn swap_playlist(&self, tracks: Vec<Track>, crossfade: Duration) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("swap_playlist", Priority::High),
                lifecycle_gate(self.core.clone(), "swap_playlist", &[LifecycleEvent::Load]),
                move |_| Box::pin(async move { core.swap_playlist(tracks, crossfade).await }),
            )
            .await
    }

    pub async fn get_playlist(&self) -> Vec<Track> {
        self.core.playlist_snapshot().await
    }

    pub async fn current_track_metadata(&self) -> Option<TrackMetadata> {
        self.core.current_track().await.map(|track| track.metadata)
    }

    /// Crossfade to the next track; consecutive calls inside the rate
    /// window collapse (the later call wins)
    pub async fn skip_to_next(&self) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("skip_to_next", Priority::Normal).collapsible("skip"),
                navigation_gate(self.core.clone(), "skip_to_next"),
                move |_| Box::pin(async move { core.skip_to_next().await }),
            )
            .await
    }

    /// Like [`skip_to_next`](Self::skip_to_next) but failing with
    /// `RateLimited` instead of collapsing
    pub async fn skip_to_next_strict(&self) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("skip_to_next", Priority::Normal)
                    .collapsible("skip")
                    .strict(),
                navigation_gate(self.core.clone(), "skip_to_next"),
                move |_| Box::pin(async move { core.skip_to_next().await }),
            )
            .await
    }

    pub async fn skip_to_previous(&self) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("skip_to_previous", Priority::Normal).collapsible("skip"),
                navigation_gate(self.core.clone(), "skip_to_previous"),
                move |_| Box::pin(async move { core.skip_to_previous().await }),
            )
            .await
    }

    pub async fn jump_to(&self, index: usize) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("jump_to", Priority::Normal).collapsible("skip"),
                navigation_gate(self.core.clone(), "jump_to"),
                move |_| Box::pin(async move { core.jump_to(index).await }),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Start playback; `None` fades in over the configured default
    pub async fn start_playing(&self, fade_in: Option<Duration>) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("start_playing", Priority::Normal),
                lifecycle_gate(
                    self.core.clone(),
                    "start_playing",
                    &[LifecycleEvent::Start, LifecycleEvent::Resume],
                ),
                move |_| Box::pin(async move { core.start_playing(fade_in).await }),
            )
            .await
    }

    pub async fn pause(&self) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("pause", Priority::Normal),
                lifecycle_gate(self.core.clone(), "pause", &[LifecycleEvent::Pause]),
                move |_| Box::pin(async move { core.pause().await }),
            )
            .await
    }

    pub async fn resume(&self) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("resume", Priority::Normal),
                lifecycle_gate(self.core.clone(), "resume", &[LifecycleEvent::Resume]),
                move |_| Box::pin(async move { core.resume().await }),
            )
            .await
    }

    /// Fade out and stop; preempts whatever is running
    pub async fn stop(&self, fade_out: Duration) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("stop", Priority::Critical),
                lifecycle_gate(self.core.clone(), "stop", &[LifecycleEvent::Stop]),
                move |_| Box::pin(async move { core.stop(fade_out).await }),
            )
            .await
    }

    /// Graceful variant of [`stop`](Self::stop): same fade-out and final
    /// state, but queued at normal priority behind pending commands
    pub async fn finish(&self, fade_out: Duration) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("finish", Priority::Normal),
                lifecycle_gate(self.core.clone(), "finish", &[LifecycleEvent::Stop]),
                move |_| Box::pin(async move { core.stop(fade_out).await }),
            )
            .await
    }

    pub async fn skip_forward(&self, interval: Duration) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("skip_forward", Priority::Normal),
                seek_gate(self.core.clone(), "skip_forward"),
                move |_| Box::pin(async move { core.skip_forward(interval).await }),
            )
            .await
    }

    pub async fn skip_backward(&self, interval: Duration) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("skip_backward", Priority::Normal),
                seek_gate(self.core.clone(), "skip_backward"),
                move |_| Box::pin(async move { core.skip_backward(interval).await }),
            )
            .await
    }

    pub async fn seek(&self, to: Duration, fade: Duration) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("seek", Priority::Normal),
                seek_gate(self.core.clone(), "seek"),
                move |_| Box::pin(async move { core.seek(to, fade).await }),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Overlay
    // ------------------------------------------------------------------

    pub async fn start_overlay(&self, track: Track, config: OverlayConfig) -> Result<()> {
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("start_overlay", Priority::Normal),
                always_allowed(),
                move |_| Box::pin(async move { overlay.start(track, config).await }),
            )
            .await
    }

    pub async fn stop_overlay(&self) -> Result<()> {
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("stop_overlay", Priority::Normal),
                always_allowed(),
                move |_| Box::pin(async move { overlay.stop().await }),
            )
            .await
    }

    pub async fn pause_overlay(&self) -> Result<()> {
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("pause_overlay", Priority::Normal),
                always_allowed(),
                move |_| Box::pin(async move { overlay.pause().await }),
            )
            .await
    }

    pub async fn resume_overlay(&self) -> Result<()> {
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("resume_overlay", Priority::Normal),
                always_allowed(),
                move |_| Box::pin(async move { overlay.resume().await }),
            )
            .await
    }

    pub async fn replace_overlay(&self, track: Track) -> Result<()> {
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("replace_overlay", Priority::Normal),
                always_allowed(),
                move |_| Box::pin(async move { overlay.replace(track).await }),
            )
            .await
    }

    pub async fn set_overlay_volume(&self, volume: f32) -> Result<()> {
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("set_overlay_volume", Priority::High),
                always_allowed(),
                move |_| Box::pin(async move { overlay.set_volume(volume).await }),
            )
            .await
    }

    pub fn overlay_state(&self) -> OverlayState {
        self.overlay.state()
    }

    // ------------------------------------------------------------------
    // Global aggregates
    // ------------------------------------------------------------------

    /// Pause main and overlay; neither waits on or observes the other
    pub async fn pause_all(&self) -> Result<()> {
        let core = self.core.clone();
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("pause_all", Priority::Normal),
                always_allowed(),
                move |_| {
                    Box::pin(async move {
                        // Best-effort fan-out: a side that is not in a
                        // pausable state is simply left alone
                        let _ = core.pause().await;
                        let _ = overlay.pause().await;
                        Ok(())
                    })
                },
            )
            .await
    }

    pub async fn resume_all(&self) -> Result<()> {
        let core = self.core.clone();
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("resume_all", Priority::Normal),
                always_allowed(),
                move |_| {
                    Box::pin(async move {
                        let _ = core.resume().await;
                        let _ = overlay.resume().await;
                        Ok(())
                    })
                },
            )
            .await
    }

    pub async fn stop_all(&self) -> Result<()> {
        let core = self.core.clone();
        let overlay = self.overlay.clone();
        self.queue
            .submit(
                Command::new("stop_all", Priority::Critical),
                always_allowed(),
                move |_| {
                    Box::pin(async move {
                        let _ = core.stop(Duration::ZERO).await;
                        let _ = overlay.stop().await;
                        Ok(())
                    })
                },
            )
            .await
    }

    /// Tear down and rebuild the voices, replaying from the last known
    /// position. This is the manual entry to the host-reset recovery path
    pub async fn reset(&self) -> Result<()> {
        let core = self.core.clone();
        self.queue
            .submit(
                Command::new("reset", Priority::Critical),
                always_allowed(),
                move |_| Box::pin(async move { core.recover_from_reset().await }),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn state(&self) -> PlayerState {
        self.core.state()
    }

    pub async fn position(&self) -> Option<PositionUpdate> {
        self.core.position().await
    }

    pub fn state_stream(&self) -> impl Stream<Item = PlayerState> + Send {
        self.surfaces.state_stream()
    }

    pub fn position_stream(&self) -> impl Stream<Item = PositionUpdate> + Send {
        self.surfaces.position_stream()
    }

    pub fn track_stream(&self) -> impl Stream<Item = Track> + Send {
        self.surfaces.track_stream()
    }

    pub fn crossfade_progress_stream(&self) -> impl Stream<Item = CrossfadeProgress> + Send {
        self.surfaces.crossfade_progress_stream()
    }

    pub fn event_log_stream(&self) -> impl Stream<Item = LogEntry> + Send {
        self.surfaces.event_log_stream()
    }

    pub fn overlay_state_stream(&self) -> impl Stream<Item = OverlayState> + Send {
        BroadcastStream::new(self.overlay.observe_state()).filter_map(|item| item.ok())
    }

    /// Raw typed event subscription (superset of the log surface)
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.surfaces.subscribe_events()
    }

    /// Most recent log entries, oldest first (bounded ring)
    pub fn recent_events(&self) -> Vec<LogEntry> {
        self.surfaces.recent_log()
    }

    /// Operation-queue diagnostics
    pub fn diagnostics(&self) -> OpQueueStats {
        self.queue.stats()
    }

    pub fn session(&self) -> &Arc<dyn SessionAdapter> {
        &self.session
    }
}

fn always_allowed() -> Gate {
    Box::new(|| Ok(()))
}

/// Permit the command when the lifecycle table permits any of `events`
fn lifecycle_gate(
    core: Arc<PlaybackCore>,
    name: &'static str,
    events: &'static [LifecycleEvent],
) -> Gate {
    Box::new(move || {
        let state = core.state();
        if events.iter().any(|event| state.permits(*event)) {
            Ok(())
        } else {
            Err(Error::invalid_state(name, state))
        }
    })
}

/// Seek-family commands need an audible or paused player
fn seek_gate(core: Arc<PlaybackCore>, name: &'static str) -> Gate {
    Box::new(move || {
        let state = core.state();
        if matches!(state, PlayerState::Playing | PlayerState::Paused) {
            Ok(())
        } else {
            Err(Error::invalid_state(name, state))
        }
    })
}

/// Track navigation works while audible, paused, or merely prepared
fn navigation_gate(core: Arc<PlaybackCore>, name: &'static str) -> Gate {
    Box::new(move || {
        let state = core.state();
        if matches!(
            state,
            PlayerState::Playing
                | PlayerState::Paused
                | PlayerState::Idle
                | PlayerState::Preparing
                | PlayerState::Finished
        ) {
            Ok(())
        } else {
            Err(Error::invalid_state(name, state))
        }
    })
}

/// Watch the session adapter's streams and self-heal
///
/// Holds only weak handles so a dropped player tears the watcher down.
fn spawn_session_watcher(
    core: Arc<PlaybackCore>,
    overlay: Arc<OverlayPlayer>,
    session: Arc<dyn SessionAdapter>,
) {
    let core = Arc::downgrade(&core);
    let overlay = Arc::downgrade(&overlay);
    let mut interruptions = session.observe_interruption();
    let mut routes = session.observe_route_change();
    let mut resets = session.observe_external_reset();

    tokio::spawn(async move {
        loop {
            let (Some(core), Some(overlay)) = (core.upgrade(), overlay.upgrade()) else {
                break;
            };
            tokio::select! {
                // Re-check liveness periodically even with no events
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                event = interruptions.recv() => match event {
                    Ok(InterruptionEvent::Began) => {
                        info!("session interruption began: pausing");
                        let _ = core.pause().await;
                        let _ = overlay.pause().await;
                    }
                    Ok(InterruptionEvent::Ended { should_resume: true }) => {
                        info!("session interruption ended: resuming");
                        let _ = core.resume().await;
                        let _ = overlay.resume().await;
                    }
                    Ok(InterruptionEvent::Ended { should_resume: false }) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = routes.recv() => match event {
                    Ok(change) => {
                        warn!(reason = %change.reason, "route change observed");
                        let _ = core.handle_route_change().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = resets.recv() => match event {
                    Ok(()) => {
                        warn!("external engine reset observed");
                        let _ = core.recover_from_reset().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}
