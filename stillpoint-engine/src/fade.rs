//! Volume envelope engine
//!
//! Drives gain ramps in software at 100 Hz on the host's gain nodes. Every
//! ramp is cooperatively cancellable: the flag is checked at each tick and
//! a cancelled ramp leaves the gain exactly where the last tick put it,
//! never snapped to the target. Pausing a crossfade and resuming it later
//! is expressed as a second crossfade starting at the frozen progress.

use crate::host::{AudioHost, Gain};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stillpoint_common::FadeCurve;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::trace;

/// Software ramp tick: 10 ms, i.e. 100 updates per second
pub const RAMP_TICK: Duration = Duration::from_millis(10);

/// Shared cooperative cancellation flag
///
/// Cloned into every ramp a command starts; cancelling the flag stops all
/// of them at their next tick.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a ramp ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeOutcome {
    Completed,
    /// Cancelled at `progress`; the gain keeps its last written value
    Cancelled { progress: f32 },
}

impl FadeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FadeOutcome::Completed)
    }
}

/// Envelope engine bound to one host
pub struct FadeEngine {
    host: Arc<dyn AudioHost>,
}

impl FadeEngine {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self { host }
    }

    /// Single-gain fade from `from` to `to` over `duration`
    ///
    /// A zero duration writes the target immediately; equal endpoints are
    /// a no-op. Rising fades follow the curve's fade-in shape, falling
    /// fades its fade-out shape.
    pub async fn fade(
        &self,
        gain: Gain,
        from: f32,
        to: f32,
        duration: Duration,
        curve: FadeCurve,
        cancel: &CancelFlag,
    ) -> FadeOutcome {
        let from = from.clamp(0.0, 1.0);
        let to = to.clamp(0.0, 1.0);

        if (from - to).abs() < f32::EPSILON {
            return FadeOutcome::Completed;
        }
        if duration.is_zero() {
            self.host.set_gain(gain, to);
            return FadeOutcome::Completed;
        }

        let started = Instant::now();
        let mut ticker = interval(RAMP_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut progress = 0.0f32;

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() {
                trace!(?gain, progress, "fade cancelled");
                return FadeOutcome::Cancelled { progress };
            }

            progress = (started.elapsed().as_secs_f32() / duration.as_secs_f32()).min(1.0);
            let value = if to > from {
                from + (to - from) * curve.fade_in(progress)
            } else {
                to + (from - to) * curve.fade_out(progress)
            };
            self.host.set_gain(gain, value);

            if progress >= 1.0 {
                return FadeOutcome::Completed;
            }
        }
    }

    /// Paired complementary ramps on two gains
    ///
    /// `gain_out` runs the curve's fade-out envelope while `gain_in` runs
    /// its fade-in counterpart. `start_progress` lets a frozen crossfade
    /// resume where it stopped: with `start_progress = p` and `duration`
    /// set to the remaining time, progress runs `p → 1` and the envelopes
    /// pick up exactly at the frozen gains. `on_progress` is invoked at
    /// every tick (100 Hz) with the current progress.
    pub async fn crossfade<F>(
        &self,
        gain_out: Gain,
        gain_in: Gain,
        duration: Duration,
        curve: FadeCurve,
        start_progress: f32,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> FadeOutcome
    where
        F: FnMut(f32) + Send,
    {
        let start_progress = start_progress.clamp(0.0, 1.0);

        if duration.is_zero() || start_progress >= 1.0 {
            self.host.set_gain(gain_out, curve.fade_out(1.0));
            self.host.set_gain(gain_in, curve.fade_in(1.0));
            on_progress(1.0);
            return FadeOutcome::Completed;
        }

        let started = Instant::now();
        let span = 1.0 - start_progress;
        let mut ticker = interval(RAMP_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut progress = start_progress;

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() {
                trace!(?gain_out, ?gain_in, progress, "crossfade cancelled");
                return FadeOutcome::Cancelled { progress };
            }

            let fraction =
                (started.elapsed().as_secs_f32() / duration.as_secs_f32()).min(1.0);
            progress = start_progress + span * fraction;
            self.host.set_gain(gain_out, curve.fade_out(progress));
            self.host.set_gain(gain_in, curve.fade_in(progress));
            on_progress(progress);

            if progress >= 1.0 {
                return FadeOutcome::Completed;
            }
        }
    }
}
