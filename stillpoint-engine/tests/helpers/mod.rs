//! Shared helpers for integration tests
//!
//! Every suite runs against the simulated host with the tokio clock
//! paused, so wall-clock scenarios ("a crossfade begins at t=15s") are
//! exact and fast.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;
use stillpoint_common::{Track, TrackSource};
use stillpoint_engine::config::PlayerConfig;
use stillpoint_engine::host::{AudioHost, SimulatedHost};
use stillpoint_engine::player::Player;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Register a source on the host and return a track for it
pub fn track(host: &SimulatedHost, key: &str, secs: f64) -> Track {
    host.register(key, Duration::from_secs_f64(secs));
    Track::new(TrackSource::named(key)).with_title(key)
}

/// Simulated host plus a player built on it
pub struct TestRig {
    pub host: Arc<SimulatedHost>,
    pub player: Player,
}

pub async fn rig(config: PlayerConfig) -> TestRig {
    init_tracing();
    let host = Arc::new(SimulatedHost::new(44_100));
    let player = Player::new(host.clone() as Arc<dyn AudioHost>, config)
        .await
        .expect("player construction");
    TestRig { host, player }
}

/// Advance the paused tokio clock through `secs` of virtual time
pub async fn run_for(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

pub fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value)
}
