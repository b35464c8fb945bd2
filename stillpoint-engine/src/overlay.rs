//! Overlay voice
//!
//! An independent single-voice player mixed on top of the main playlist:
//! ambient loops, bells, voice guidance. It has its own loop policy,
//! inter-loop silence, fades, and volume, and it shares nothing with the
//! main playback core except the host's master output. Main-player
//! crossfades never read or write overlay state, and vice versa.

use crate::config::OverlayConfig;
use crate::error::{Error, Result};
use crate::fade::{CancelFlag, FadeEngine};
use crate::host::{AudioHost, Gain, Voice};
use crate::surfaces::EventSurfaces;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stillpoint_common::{time, OverlayState, PlayerEvent, Track};
use tokio::sync::broadcast;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Fade used by `replace` around the buffer swap
const REPLACE_FADE: Duration = Duration::from_millis(200);

/// Ramp back to target volume after a resume interrupted a fade
const SETTLE_FADE: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct OverlayInner {
    track: Option<Track>,
    config: OverlayConfig,
    duration: Option<Duration>,
    loops_elapsed: u32,
    /// Render frame the current iteration's schedule started at
    started_at: Option<u64>,
    /// Offset into the track at schedule time
    offset: Duration,
    paused_position: Option<Duration>,
}

/// Independent looping overlay player
pub struct OverlayPlayer {
    host: Arc<dyn AudioHost>,
    fade: FadeEngine,
    surfaces: Arc<EventSurfaces>,
    state: Mutex<OverlayState>,
    state_tx: broadcast::Sender<OverlayState>,
    inner: tokio::sync::Mutex<OverlayInner>,
    /// Invalidates stale loop drivers after stop/replace/pause
    generation: AtomicU64,
    driver_cancel: Mutex<CancelFlag>,
}

impl OverlayPlayer {
    pub fn new(host: Arc<dyn AudioHost>, surfaces: Arc<EventSurfaces>) -> Arc<Self> {
        let (state_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            fade: FadeEngine::new(host.clone()),
            host,
            surfaces,
            state: Mutex::new(OverlayState::Idle),
            state_tx,
            inner: tokio::sync::Mutex::new(OverlayInner::default()),
            generation: AtomicU64::new(0),
            driver_cancel: Mutex::new(CancelFlag::new()),
        })
    }

    pub fn state(&self) -> OverlayState {
        *self.state.lock().unwrap()
    }

    pub fn observe_state(&self) -> broadcast::Receiver<OverlayState> {
        self.state_tx.subscribe()
    }

    pub async fn loops_elapsed(&self) -> u32 {
        self.inner.lock().await.loops_elapsed
    }

    fn set_state(&self, new_state: OverlayState) {
        let old_state = {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            *state = new_state;
            old
        };
        if old_state != new_state {
            debug!(%old_state, %new_state, "overlay state");
            let _ = self.state_tx.send(new_state);
            self.surfaces.emit_event(PlayerEvent::OverlayStateChanged {
                old_state,
                new_state,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Invalidate the running driver and hand out a fresh cancel flag
    fn supersede_driver(&self) -> (u64, CancelFlag) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.driver_cancel.lock().unwrap();
        guard.cancel();
        let fresh = CancelFlag::new();
        *guard = fresh.clone();
        (generation, fresh)
    }

    /// Start (or restart) the overlay with a track and configuration
    pub async fn start(self: &Arc<Self>, track: Track, config: OverlayConfig) -> Result<()> {
        config.validate()?;
        let (generation, cancel) = self.supersede_driver();
        self.set_state(OverlayState::Preparing);

        let loaded = match self.host.load(Voice::Overlay, &track.source).await {
            Ok(loaded) => loaded,
            Err(host_err) => {
                self.set_state(OverlayState::Idle);
                let err = Error::from(host_err);
                self.surfaces.emit_event(PlayerEvent::PlaybackError {
                    operation: "start_overlay".into(),
                    message: err.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                return Err(err);
            }
        };

        {
            let mut inner = self.inner.lock().await;
            *inner = OverlayInner {
                track: Some(loaded.track),
                duration: Some(loaded.duration),
                config: config.clone(),
                loops_elapsed: 0,
                started_at: None,
                offset: Duration::ZERO,
                paused_position: None,
            };
        }

        // Start silent when a fade-in is wanted; the driver takes it up
        let initial = if config.fade_in.is_zero() { config.volume } else { 0.0 };
        self.host.set_gain(Gain::Overlay, initial);
        self.set_state(OverlayState::Playing);
        self.spawn_driver(generation, Duration::ZERO, cancel);
        info!(?config.loop_mode, "overlay started");
        Ok(())
    }

    /// Pause the overlay, freezing its position and gain
    pub async fn pause(&self) -> Result<()> {
        if self.state() != OverlayState::Playing {
            return Err(Error::invalid_state("pause_overlay", self.state()));
        }
        let _ = self.supersede_driver();

        let mut inner = self.inner.lock().await;
        let position = self.current_offset(&inner);
        self.host.pause_voice(Voice::Overlay);
        inner.paused_position = Some(position);
        inner.started_at = None;
        drop(inner);

        self.set_state(OverlayState::Paused);
        Ok(())
    }

    /// Continue a paused overlay from its frozen position
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        if self.state() != OverlayState::Paused {
            return Err(Error::invalid_state("resume_overlay", self.state()));
        }
        let (generation, cancel) = self.supersede_driver();

        let offset = {
            let mut inner = self.inner.lock().await;
            inner.paused_position.take().unwrap_or_default()
        };
        // Reschedule from the frozen position rather than resuming: the
        // driver re-anchors its own timing bookkeeping either way
        self.host.stop_voice(Voice::Overlay);
        self.set_state(OverlayState::Playing);
        self.spawn_driver(generation, offset, cancel);
        Ok(())
    }

    /// Fade out (per configuration) and return to idle
    pub async fn stop(&self) -> Result<()> {
        let state = self.state();
        if state == OverlayState::Idle {
            return Ok(());
        }
        let (_, cancel) = self.supersede_driver();
        self.set_state(OverlayState::Stopping);

        let (fade_out, curve) = {
            let inner = self.inner.lock().await;
            (inner.config.fade_out, inner.config.fade_curve)
        };
        if state == OverlayState::Playing && !fade_out.is_zero() {
            let level = self.host.gain(Gain::Overlay);
            self.fade
                .fade(Gain::Overlay, level, 0.0, fade_out, curve, &cancel)
                .await;
        }

        self.host.stop_voice(Voice::Overlay);
        self.host.unload(Voice::Overlay);
        self.host.set_gain(Gain::Overlay, 0.0);
        {
            let mut inner = self.inner.lock().await;
            *inner = OverlayInner::default();
        }
        self.set_state(OverlayState::Idle);
        info!("overlay stopped");
        Ok(())
    }

    /// Swap the overlay's content in place with a brief fade
    pub async fn replace(self: &Arc<Self>, track: Track) -> Result<()> {
        let state = self.state();
        if !matches!(state, OverlayState::Playing | OverlayState::Paused) {
            return Err(Error::invalid_state("replace_overlay", state));
        }
        let (generation, cancel) = self.supersede_driver();

        let curve = self.inner.lock().await.config.fade_curve;
        if state == OverlayState::Playing {
            let level = self.host.gain(Gain::Overlay);
            self.fade
                .fade(Gain::Overlay, level, 0.0, REPLACE_FADE, curve, &cancel)
                .await;
        }
        self.host.stop_voice(Voice::Overlay);

        let loaded = match self.host.load(Voice::Overlay, &track.source).await {
            Ok(loaded) => loaded,
            Err(host_err) => {
                let err = Error::from(host_err);
                warn!(%err, "overlay replace failed");
                self.host.unload(Voice::Overlay);
                self.set_state(OverlayState::Idle);
                return Err(err);
            }
        };

        {
            let mut inner = self.inner.lock().await;
            inner.track = Some(loaded.track);
            inner.duration = Some(loaded.duration);
            inner.offset = Duration::ZERO;
            inner.started_at = None;
            if state == OverlayState::Paused {
                inner.paused_position = Some(Duration::ZERO);
            }
        }

        if state == OverlayState::Playing {
            self.spawn_driver(generation, Duration::ZERO, cancel);
        }
        info!("overlay replaced");
        Ok(())
    }

    /// Set overlay volume; independent of the master gain
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(Error::invalid_parameter("overlay_volume", "must be finite"));
        }
        let clamped = volume.clamp(0.0, 1.0);
        let mut inner = self.inner.lock().await;
        inner.config.volume = clamped;
        drop(inner);
        if self.state() == OverlayState::Playing {
            self.host.set_gain(Gain::Overlay, clamped);
        }
        Ok(())
    }

    fn current_offset(&self, inner: &OverlayInner) -> Duration {
        if let Some(frozen) = inner.paused_position {
            return frozen;
        }
        let Some(started) = inner.started_at else {
            return inner.offset;
        };
        let played = self
            .host
            .render_time_now()
            .saturating_sub(started);
        inner.offset + time::duration_for(played, self.host.sample_rate())
    }

    fn spawn_driver(self: &Arc<Self>, generation: u64, offset: Duration, cancel: CancelFlag) {
        let overlay = Arc::clone(self);
        tokio::spawn(async move {
            overlay.run_loops(generation, offset, cancel).await;
        });
    }

    fn superseded(&self, generation: u64, cancel: &CancelFlag) -> bool {
        cancel.is_cancelled() || self.generation.load(Ordering::SeqCst) != generation
    }

    /// Loop driver: schedules iterations, applies per-loop or endpoint
    /// fades, counts completions, and honors the inter-loop delay
    async fn run_loops(self: Arc<Self>, generation: u64, mut offset: Duration, cancel: CancelFlag) {
        loop {
            if self.superseded(generation, &cancel) {
                return;
            }

            let (config, duration, completed) = {
                let inner = self.inner.lock().await;
                let Some(duration) = inner.duration else { return };
                (inner.config.clone(), duration, inner.loops_elapsed)
            };

            let first_play = completed == 0 && offset.is_zero();
            let fade_in_wanted =
                !config.fade_in.is_zero() && (config.fade_each_loop || first_play);
            let final_iteration = config.loop_mode.is_final_iteration(completed);
            let fade_out_wanted =
                !config.fade_out.is_zero() && (config.fade_each_loop || final_iteration);

            // Schedule this iteration
            let at_frame = self.host.render_time_now() + self.host.lead_frames();
            if self
                .host
                .schedule(Voice::Overlay, at_frame, offset)
                .await
                .is_err()
            {
                warn!("overlay schedule failed; stopping loop");
                self.set_state(OverlayState::Idle);
                return;
            }
            {
                let mut inner = self.inner.lock().await;
                inner.started_at = Some(at_frame);
                inner.offset = offset;
            }
            let iteration_start = Instant::now();
            let remaining = duration.saturating_sub(offset);

            if fade_in_wanted {
                self.fade
                    .fade(
                        Gain::Overlay,
                        0.0,
                        config.volume,
                        config.fade_in,
                        config.fade_curve,
                        &cancel,
                    )
                    .await;
            } else {
                // Settle to target if a pause or replace left the gain low
                let level = self.host.gain(Gain::Overlay);
                if (level - config.volume).abs() > 1e-3 {
                    self.fade
                        .fade(
                            Gain::Overlay,
                            level,
                            config.volume,
                            SETTLE_FADE,
                            config.fade_curve,
                            &cancel,
                        )
                        .await;
                }
            }
            if self.superseded(generation, &cancel) {
                return;
            }

            // Sleep to the fade-out point, fade if wanted, then to the end
            let body = remaining.saturating_sub(if fade_out_wanted {
                config.fade_out
            } else {
                Duration::ZERO
            });
            sleep_until(iteration_start + body).await;
            if self.superseded(generation, &cancel) {
                return;
            }
            if fade_out_wanted {
                let level = self.host.gain(Gain::Overlay);
                self.fade
                    .fade(
                        Gain::Overlay,
                        level,
                        0.0,
                        config.fade_out,
                        config.fade_curve,
                        &cancel,
                    )
                    .await;
            }
            sleep_until(iteration_start + remaining).await;
            if self.superseded(generation, &cancel) {
                return;
            }

            self.host.stop_voice(Voice::Overlay);
            let completed = {
                let mut inner = self.inner.lock().await;
                inner.loops_elapsed += 1;
                inner.started_at = None;
                inner.loops_elapsed
            };
            self.surfaces.emit_event(PlayerEvent::OverlayLoopCompleted {
                loops_elapsed: completed,
                timestamp: chrono::Utc::now(),
            });
            offset = Duration::ZERO;

            if !config.loop_mode.wants_iteration(completed) {
                break;
            }
            if !config.loop_delay.is_zero() {
                sleep(config.loop_delay).await;
                if self.superseded(generation, &cancel) {
                    return;
                }
            }
        }

        self.host.unload(Voice::Overlay);
        self.host.set_gain(Gain::Overlay, 0.0);
        self.set_state(OverlayState::Idle);
        debug!("overlay loop policy complete");
    }
}
