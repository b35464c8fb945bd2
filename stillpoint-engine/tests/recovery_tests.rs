//! Host-reset recovery, session self-heal, and external-session
//! validation

mod helpers;

use helpers::{init_tracing, run_for, secs, track};
use std::sync::Arc;
use stillpoint_common::{LogLevel, PlayerEvent, PlayerState};
use stillpoint_engine::config::{PlayerConfig, SessionMode};
use stillpoint_engine::host::{AudioHost, SimulatedHost, Voice};
use stillpoint_engine::player::Player;
use stillpoint_engine::session::{InterruptionEvent, ManualSession, SessionAdapter};
use stillpoint_engine::surfaces::NullSink;

async fn rig_with_session(
    config: PlayerConfig,
) -> (Arc<SimulatedHost>, Arc<ManualSession>, Player) {
    init_tracing();
    let host = Arc::new(SimulatedHost::new(44_100));
    let session = Arc::new(ManualSession::new());
    let player = Player::with_adapters(
        host.clone() as Arc<dyn AudioHost>,
        session.clone() as Arc<dyn SessionAdapter>,
        Arc::new(NullSink),
        config,
    )
    .await
    .expect("player construction");
    (host, session, player)
}

#[tokio::test(start_paused = true)]
async fn test_external_reset_recovers_playback() {
    let (host, session, player) = rig_with_session(PlayerConfig::default()).await;
    let mut events = player.subscribe_events();

    player
        .load_playlist(vec![track(&host, "t", 120.0)])
        .await
        .unwrap();
    player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(10.0).await;

    // The platform loses the audio graph
    host.wipe();
    session.fire_external_reset();
    run_for(1.0).await;

    // Recovered: still playing, position restored near where it was
    assert_eq!(player.state(), PlayerState::Playing);
    let position = player.position().await.unwrap().position;
    assert!(
        position >= secs(9.5) && position <= secs(12.5),
        "position after recovery: {:?}",
        position
    );

    let mut recovered = false;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::RecoveryAttempted { succeeded: true, .. } = event {
            recovered = true;
        }
    }
    assert!(recovered);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_fails_after_two_attempts() {
    let (host, session, player) = rig_with_session(PlayerConfig::default()).await;

    player
        .load_playlist(vec![track(&host, "t", 120.0)])
        .await
        .unwrap();
    player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(5.0).await;

    // Both recovery attempts will fail their reloads
    host.fail_next_loads(2);
    host.wipe();
    session.fire_external_reset();
    run_for(1.0).await;

    assert_eq!(player.state(), PlayerState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_route_change_reseats_playback() {
    let (host, session, player) = rig_with_session(PlayerConfig::default()).await;
    let mut events = player.subscribe_events();

    player
        .load_playlist(vec![track(&host, "t", 120.0)])
        .await
        .unwrap();
    player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(20.0).await;

    session.fire_route_change("headphones unplugged");
    run_for(1.0).await;

    // Still playing; the active voice was rescheduled at ~the position it
    // had when the route changed
    assert_eq!(player.state(), PlayerState::Playing);
    let position = player.position().await.unwrap().position;
    assert!(position >= secs(19.5) && position <= secs(22.5));
    let active_scheduled = host.scheduled_at(Voice::MainA).is_some()
        || host.scheduled_at(Voice::MainB).is_some();
    assert!(active_scheduled);

    // The self-heal is reported as a RecoveryAttempted event, which the
    // log surface renders at Warning level
    let mut healed = false;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::RecoveryAttempted { succeeded: true, .. } = event {
            healed = true;
        }
    }
    assert!(healed, "expected a successful RecoveryAttempted event");
    assert!(player
        .recent_events()
        .iter()
        .any(|entry| entry.level == LogLevel::Warning && entry.message.contains("recovery")));
}

#[tokio::test(start_paused = true)]
async fn test_interruption_pauses_and_resumes() {
    let (host, session, player) = rig_with_session(PlayerConfig::default()).await;

    player
        .load_playlist(vec![track(&host, "t", 120.0)])
        .await
        .unwrap();
    player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(5.0).await;

    session.fire_interruption(InterruptionEvent::Began);
    run_for(0.5).await;
    assert_eq!(player.state(), PlayerState::Paused);

    session.fire_interruption(InterruptionEvent::Ended { should_resume: true });
    run_for(0.5).await;
    assert_eq!(player.state(), PlayerState::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_external_session_validation_warns_without_override() {
    init_tracing();
    let host = Arc::new(SimulatedHost::new(44_100));
    let session = Arc::new(ManualSession::new());
    session.set_valid(false);

    let config = PlayerConfig::new().with_session_mode(SessionMode::External);
    let player = Player::with_adapters(
        host.clone() as Arc<dyn AudioHost>,
        session as Arc<dyn SessionAdapter>,
        Arc::new(NullSink),
        config,
    )
    .await
    .expect("construction succeeds despite invalid external session");

    let warnings: Vec<_> = player
        .recent_events()
        .into_iter()
        .filter(|entry| entry.level == LogLevel::Warning)
        .collect();
    assert!(
        warnings.iter().any(|entry| entry.message.contains("session")),
        "expected a session warning, got {:?}",
        warnings
    );

    // The engine did not try to reconfigure the session: playback still
    // starts normally against whatever session exists
    player
        .load_playlist(vec![track(&host, "t", 30.0)])
        .await
        .unwrap();
    player.start_playing(Some(secs(0.0))).await.unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
}
