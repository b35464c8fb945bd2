//! Platform audio-session boundary
//!
//! The engine does not talk to the OS audio session itself; it consumes
//! this trait. In `Managed` mode the engine configures and activates the
//! session through the adapter; in `External` mode the embedder owns the
//! session and the engine only validates that it permits playback,
//! warning (never overriding) when it does not.
//!
//! The observation streams feed the player's watcher task: interruptions
//! pause and optionally resume playback, route changes trigger a
//! seek-with-fade self-heal, and external resets trigger voice recovery.

use crate::config::SessionMode;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Platform session interruption (phone call, other app taking audio)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionEvent {
    Began,
    Ended {
        /// Whether the platform suggests resuming playback
        should_resume: bool,
    },
}

/// An output-route change (headphones unplugged, new device)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChangeEvent {
    pub reason: String,
}

/// Capabilities the engine consumes from the platform session layer
#[async_trait]
pub trait SessionAdapter: Send + Sync {
    /// Configure category/options for the mode; `mix_with_others` is a
    /// hint the adapter may honor or ignore
    async fn configure(&self, mode: SessionMode, mix_with_others: bool) -> Result<()>;

    async fn activate(&self) -> Result<()>;

    async fn deactivate(&self) -> Result<()>;

    /// In `External` mode: does the externally-owned session permit
    /// playback output?
    fn validate(&self) -> Result<()>;

    fn observe_interruption(&self) -> broadcast::Receiver<InterruptionEvent>;

    fn observe_route_change(&self) -> broadcast::Receiver<RouteChangeEvent>;

    fn observe_external_reset(&self) -> broadcast::Receiver<()>;
}

/// Session adapter that accepts everything and never observes anything
///
/// The default for tests and for embeddings that handle the platform
/// session entirely outside the engine.
pub struct NullSession {
    interruption_tx: broadcast::Sender<InterruptionEvent>,
    route_tx: broadcast::Sender<RouteChangeEvent>,
    reset_tx: broadcast::Sender<()>,
}

impl NullSession {
    pub fn new() -> Self {
        let (interruption_tx, _) = broadcast::channel(8);
        let (route_tx, _) = broadcast::channel(8);
        let (reset_tx, _) = broadcast::channel(8);
        Self {
            interruption_tx,
            route_tx,
            reset_tx,
        }
    }
}

impl Default for NullSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionAdapter for NullSession {
    async fn configure(&self, _mode: SessionMode, _mix_with_others: bool) -> Result<()> {
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn observe_interruption(&self) -> broadcast::Receiver<InterruptionEvent> {
        self.interruption_tx.subscribe()
    }

    fn observe_route_change(&self) -> broadcast::Receiver<RouteChangeEvent> {
        self.route_tx.subscribe()
    }

    fn observe_external_reset(&self) -> broadcast::Receiver<()> {
        self.reset_tx.subscribe()
    }
}

/// Hand-driven session adapter for tests and development
///
/// Behaves like [`NullSession`] but exposes the firing side of every
/// observation stream, plus a switch that makes `validate` fail.
pub struct ManualSession {
    interruption_tx: broadcast::Sender<InterruptionEvent>,
    route_tx: broadcast::Sender<RouteChangeEvent>,
    reset_tx: broadcast::Sender<()>,
    valid: std::sync::atomic::AtomicBool,
}

impl ManualSession {
    pub fn new() -> Self {
        let (interruption_tx, _) = broadcast::channel(8);
        let (route_tx, _) = broadcast::channel(8);
        let (reset_tx, _) = broadcast::channel(8);
        Self {
            interruption_tx,
            route_tx,
            reset_tx,
            valid: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn fire_interruption(&self, event: InterruptionEvent) {
        let _ = self.interruption_tx.send(event);
    }

    pub fn fire_route_change(&self, reason: &str) {
        let _ = self.route_tx.send(RouteChangeEvent {
            reason: reason.to_string(),
        });
    }

    pub fn fire_external_reset(&self) {
        let _ = self.reset_tx.send(());
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for ManualSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionAdapter for ManualSession {
    async fn configure(&self, _mode: SessionMode, _mix_with_others: bool) -> Result<()> {
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.valid.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(crate::error::Error::SessionConfigurationFailed {
                reason: "session does not permit playback output".into(),
            })
        }
    }

    fn observe_interruption(&self) -> broadcast::Receiver<InterruptionEvent> {
        self.interruption_tx.subscribe()
    }

    fn observe_route_change(&self) -> broadcast::Receiver<RouteChangeEvent> {
        self.route_tx.subscribe()
    }

    fn observe_external_reset(&self) -> broadcast::Receiver<()> {
        self.reset_tx.subscribe()
    }
}
