//! End-to-end auto-advance scenarios on the simulated host
//!
//! Crossfades here overlap the two voices: the incoming track is
//! physically scheduled when the crossfade starts, so back-to-back tracks
//! share the fade window and each track's position counts from its own
//! physical start.

mod helpers;

use helpers::{rig, run_for, secs, track};
use stillpoint_common::{PlayerEvent, PlayerState, RepeatMode};
use stillpoint_engine::config::PlayerConfig;

#[tokio::test(start_paused = true)]
async fn test_basic_playlist_crossfade() {
    let config = PlayerConfig::new()
        .with_crossfade_secs(5.0)
        .unwrap()
        .with_repeat_mode(RepeatMode::Off);
    let rig = rig(config).await;
    let mut events = rig.player.subscribe_events();

    let tracks = vec![
        track(&rig.host, "t1", 20.0),
        track(&rig.host, "t2", 20.0),
    ];
    let t2_id = tracks[1].id;
    rig.player.load_playlist(tracks).await.unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    assert_eq!(rig.player.state(), PlayerState::Playing);

    // Before the fade window: still on t1, no crossfade yet
    run_for(12.0).await;
    let position = rig.player.position().await.unwrap();
    assert!(position.position >= secs(11.0) && position.position <= secs(12.5));

    // The boundary crossfade begins once remaining <= 5s (t ≈ 15s) and
    // completes ≈ 5s later with t2 active, position restarted near zero
    run_for(9.5).await;
    let current = rig.player.current_track_metadata().await.unwrap();
    assert_eq!(current.title.as_deref(), Some("t2"));
    let position = rig.player.position().await.unwrap();
    assert!(
        position.position <= secs(7.5),
        "position should have restarted, got {:?}",
        position.position
    );

    // t2 plays out; with no next track the master fades and we finish
    run_for(20.0).await;
    assert_eq!(rig.player.state(), PlayerState::Finished);

    // Exactly one boundary crossfade happened
    let mut started = 0;
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PlayerEvent::CrossfadeStarted { to_track, .. } => {
                started += 1;
                assert_eq!(to_track, t2_id);
            }
            PlayerEvent::CrossfadeCompleted { .. } => completed += 1,
            _ => {}
        }
    }
    assert_eq!(started, 1);
    assert_eq!(completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_track_loop_with_repeat_limit() {
    let config = PlayerConfig::new()
        .with_crossfade_secs(4.0)
        .unwrap()
        .with_repeat_mode(RepeatMode::SingleTrack)
        .with_repeat_limit(Some(3))
        .unwrap();
    let rig = rig(config).await;
    let mut events = rig.player.subscribe_events();

    rig.player
        .load_playlist(vec![track(&rig.host, "loop-me", 10.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();

    // Three loop crossfades (repeat limit 3), then the fourth boundary
    // decision is Finish and the engine fades out
    run_for(60.0).await;
    assert_eq!(rig.player.state(), PlayerState::Finished);

    let mut loop_crossfades = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PlayerEvent::CrossfadeStarted { .. }) {
            loop_crossfades += 1;
        }
    }
    assert_eq!(loop_crossfades, 3, "repeat_limit=3 means three loop crossfades");
}

#[tokio::test(start_paused = true)]
async fn test_short_track_adapts_crossfade() {
    // 10s configured against 5s tracks: the fade zone caps at 40% = 2s
    let config = PlayerConfig::new()
        .with_crossfade_secs(10.0)
        .unwrap()
        .with_repeat_mode(RepeatMode::Playlist)
        .with_repeat_limit(Some(1))
        .unwrap();
    let rig = rig(config).await;
    let mut events = rig.player.subscribe_events();

    rig.player
        .load_playlist(vec![
            track(&rig.host, "short-a", 5.0),
            track(&rig.host, "short-b", 5.0),
        ])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();

    run_for(40.0).await;
    assert_eq!(rig.player.state(), PlayerState::Finished);

    let mut durations = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::CrossfadeStarted { duration, .. } = event {
            durations.push(duration);
        }
    }
    // a -> b, wrap b -> a, a -> b, then Finish: three boundary crossfades
    assert_eq!(durations.len(), 3);
    for duration in durations {
        assert!(
            duration <= secs(2.0) && duration >= secs(1.0),
            "adapted crossfade out of range: {:?}",
            duration
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_repeat_mode_change_applies_at_next_boundary() {
    let config = PlayerConfig::new()
        .with_crossfade_secs(2.0)
        .unwrap()
        .with_repeat_mode(RepeatMode::SingleTrack);
    let rig = rig(config).await;

    rig.player
        .load_playlist(vec![track(&rig.host, "once-looping", 10.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();

    // Let one loop crossfade happen, then switch repeat off
    run_for(9.0).await;
    rig.player.set_repeat_mode(RepeatMode::Off).await.unwrap();

    run_for(30.0).await;
    assert_eq!(rig.player.state(), PlayerState::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_empty_playlist_rejected() {
    let rig = rig(PlayerConfig::default()).await;
    let err = rig.player.load_playlist(vec![]).await.unwrap_err();
    assert_eq!(err, stillpoint_engine::Error::EmptyPlaylist);
    assert_eq!(rig.player.state(), PlayerState::Idle);
}
