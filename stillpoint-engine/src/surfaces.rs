//! Reactive event surfaces
//!
//! Five independent broadcast surfaces: lifecycle state (deduplicated),
//! position (2 Hz while playing, plus every seek), current track (on every
//! active-voice swap and load), crossfade progress, and a human-readable
//! event log mirrored into a bounded ring. Producers never block: every
//! send is lossy toward subscribers that are not keeping up.
//!
//! Ordering rule: the playback core always emits the state event before
//! any position/track/crossfade event that describes the new state; the
//! per-surface channels preserve issuance order to each subscriber.

use std::collections::VecDeque;
use std::sync::Mutex;
use stillpoint_common::{
    CrossfadeProgress, EventBus, LogEntry, NowPlaying, PlayerEvent, PlayerState, PositionUpdate,
    Track,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Default bound on the event-log ring mirror
pub const LOG_RING_CAPACITY: usize = 50;

/// Sink for now-playing metadata snapshots (lock screens, remotes)
///
/// The engine pushes; the sink decides presentation. Implementations must
/// not block.
pub trait NowPlayingSink: Send + Sync {
    fn update(&self, snapshot: NowPlaying);
}

/// Discards every snapshot
pub struct NullSink;

impl NowPlayingSink for NullSink {
    fn update(&self, _snapshot: NowPlaying) {}
}

/// All broadcast surfaces owned by one player
pub struct EventSurfaces {
    bus: EventBus,
    state_tx: broadcast::Sender<PlayerState>,
    last_state: Mutex<Option<PlayerState>>,
    position_tx: broadcast::Sender<PositionUpdate>,
    track_tx: broadcast::Sender<Track>,
    crossfade_tx: broadcast::Sender<CrossfadeProgress>,
    log_tx: broadcast::Sender<LogEntry>,
    log_ring: Mutex<VecDeque<LogEntry>>,
}

impl EventSurfaces {
    pub fn new(capacity: usize) -> Self {
        let (state_tx, _) = broadcast::channel(capacity);
        let (position_tx, _) = broadcast::channel(capacity);
        let (track_tx, _) = broadcast::channel(capacity);
        let (crossfade_tx, _) = broadcast::channel(capacity);
        let (log_tx, _) = broadcast::channel(capacity);
        Self {
            bus: EventBus::new(capacity),
            state_tx,
            last_state: Mutex::new(None),
            position_tx,
            track_tx,
            crossfade_tx,
            log_tx,
            log_ring: Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)),
        }
    }

    /// Emit a typed event onto the bus and its log rendering onto the
    /// bounded log surface
    pub fn emit_event(&self, event: PlayerEvent) {
        let entry = event.to_log_entry();
        self.bus.emit_lossy(event);

        {
            let mut ring = self.log_ring.lock().unwrap();
            if ring.len() == LOG_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }
        let _ = self.log_tx.send(entry);
    }

    /// Publish a lifecycle state; identical consecutive values are
    /// suppressed on the state surface (the bus still carries the event)
    pub fn emit_state(&self, state: PlayerState) {
        let mut last = self.last_state.lock().unwrap();
        if *last == Some(state) {
            return;
        }
        debug!(%state, "state surface");
        *last = Some(state);
        let _ = self.state_tx.send(state);
    }

    pub fn emit_position(&self, update: PositionUpdate) {
        let _ = self.position_tx.send(update);
    }

    pub fn emit_track(&self, track: Track) {
        let _ = self.track_tx.send(track);
    }

    pub fn emit_crossfade(&self, progress: CrossfadeProgress) {
        let _ = self.crossfade_tx.send(progress);
    }

    /// Snapshot of the most recent log entries, oldest first
    pub fn recent_log(&self) -> Vec<LogEntry> {
        self.log_ring.lock().unwrap().iter().cloned().collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub fn state_stream(&self) -> impl Stream<Item = PlayerState> + Send {
        drop_lagged(self.state_tx.subscribe())
    }

    pub fn position_stream(&self) -> impl Stream<Item = PositionUpdate> + Send {
        drop_lagged(self.position_tx.subscribe())
    }

    pub fn track_stream(&self) -> impl Stream<Item = Track> + Send {
        drop_lagged(self.track_tx.subscribe())
    }

    pub fn crossfade_progress_stream(&self) -> impl Stream<Item = CrossfadeProgress> + Send {
        drop_lagged(self.crossfade_tx.subscribe())
    }

    pub fn event_log_stream(&self) -> impl Stream<Item = LogEntry> + Send {
        drop_lagged(self.log_tx.subscribe())
    }
}

impl Default for EventSurfaces {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Wrap a broadcast receiver as a stream that skips lag errors: a slow
/// subscriber silently loses its own oldest events
fn drop_lagged<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> impl Stream<Item = T> + Send {
    BroadcastStream::new(rx).filter_map(|item| item.ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_state_surface_deduplicates() {
        let surfaces = EventSurfaces::new(16);
        let mut stream = Box::pin(surfaces.state_stream());

        surfaces.emit_state(PlayerState::Playing);
        surfaces.emit_state(PlayerState::Playing);
        surfaces.emit_state(PlayerState::Paused);

        assert_eq!(stream.next().await, Some(PlayerState::Playing));
        assert_eq!(stream.next().await, Some(PlayerState::Paused));
    }

    #[tokio::test]
    async fn test_log_ring_is_bounded() {
        let surfaces = EventSurfaces::new(16);
        for i in 0..(LOG_RING_CAPACITY + 20) {
            surfaces.emit_event(PlayerEvent::VolumeChanged {
                old_volume: 0.0,
                new_volume: i as f32 / 100.0,
                timestamp: chrono::Utc::now(),
            });
        }
        let log = surfaces.recent_log();
        assert_eq!(log.len(), LOG_RING_CAPACITY);
        // Oldest entries were dropped
        assert!(log[0].message.contains("0.20"));
    }

    #[tokio::test]
    async fn test_emits_do_not_block_without_subscribers() {
        let surfaces = EventSurfaces::new(4);
        surfaces.emit_position(PositionUpdate {
            position: Duration::from_secs(1),
            duration: None,
        });
        surfaces.emit_crossfade(CrossfadeProgress {
            id: 1,
            phase: stillpoint_common::CrossfadePhase::Idle,
        });
        // Nothing to assert beyond "did not panic or hang"
    }

    #[tokio::test]
    async fn test_position_stream_in_order() {
        let surfaces = EventSurfaces::new(16);
        let mut stream = Box::pin(surfaces.position_stream());
        for secs in 1..=3u64 {
            surfaces.emit_position(PositionUpdate {
                position: Duration::from_secs(secs),
                duration: Some(Duration::from_secs(10)),
            });
        }
        for secs in 1..=3u64 {
            assert_eq!(
                stream.next().await.unwrap().position,
                Duration::from_secs(secs)
            );
        }
    }
}
