//! Stop, seek, skip, swap, and volume semantics

mod helpers;

use helpers::{rig, run_for, secs, track};
use stillpoint_common::{PlayerEvent, PlayerState, RepeatMode};
use stillpoint_engine::config::PlayerConfig;
use stillpoint_engine::host::{AudioHost, Gain};
use stillpoint_engine::Error;

fn config() -> PlayerConfig {
    PlayerConfig::new()
        .with_crossfade_secs(5.0)
        .unwrap()
        .with_repeat_mode(RepeatMode::Off)
}

#[tokio::test(start_paused = true)]
async fn test_hard_stop_is_idempotent() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![track(&rig.host, "t", 30.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(5.0).await;

    rig.player.stop(secs(0.0)).await.unwrap();
    assert_eq!(rig.player.state(), PlayerState::Finished);

    // A second hard stop is a no-op that stays Finished
    rig.player.stop(secs(0.0)).await.unwrap();
    assert_eq!(rig.player.state(), PlayerState::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_stop_fades_master_out() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![track(&rig.host, "t", 30.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(5.0).await;

    rig.player.stop(secs(2.0)).await.unwrap();
    assert_eq!(rig.player.state(), PlayerState::Finished);
    assert_eq!(rig.host.gain(Gain::Master), 0.0);

    // The master ramp was driven, not snapped
    let writes = rig.host.gain_history(Gain::Master);
    let ramp: Vec<_> = writes
        .iter()
        .filter(|w| w.value > 0.0 && w.value < 1.0)
        .collect();
    assert!(ramp.len() > 50, "master fade had {} intermediate writes", ramp.len());
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_paused_finishes_without_fade() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![track(&rig.host, "t", 30.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(3.0).await;
    rig.player.pause().await.unwrap();

    rig.player.stop(secs(5.0)).await.unwrap();
    assert_eq!(rig.player.state(), PlayerState::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_seek_clamps_and_reports() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![track(&rig.host, "t", 30.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(2.0).await;

    rig.player.seek(secs(20.0), secs(0.1)).await.unwrap();
    let position = rig.player.position().await.unwrap();
    assert!(position.position >= secs(19.9) && position.position <= secs(21.0));

    // Past-the-end seeks clamp to the duration
    rig.player.seek(secs(500.0), secs(0.1)).await.unwrap();
    let position = rig.player.position().await.unwrap();
    assert!(position.position <= secs(30.0) && position.position >= secs(29.5));
}

#[tokio::test(start_paused = true)]
async fn test_skip_forward_and_backward() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![track(&rig.host, "t", 60.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(10.0).await;

    rig.player.skip_forward(secs(15.0)).await.unwrap();
    let position = rig.player.position().await.unwrap().position;
    assert!(position >= secs(24.5) && position <= secs(26.5));

    rig.player.skip_backward(secs(40.0)).await.unwrap();
    let position = rig.player.position().await.unwrap().position;
    assert!(position <= secs(1.0), "clamped to start, got {:?}", position);
}

#[tokio::test(start_paused = true)]
async fn test_strict_skip_rate_limited() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![
            track(&rig.host, "a", 60.0),
            track(&rig.host, "b", 60.0),
            track(&rig.host, "c", 60.0),
        ])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(2.0).await;

    rig.player.skip_to_next_strict().await.unwrap();
    let err = rig.player.skip_to_next_strict().await.unwrap_err();
    assert_eq!(err, Error::RateLimited);

    // Outside the window the next skip is accepted
    run_for(1.0).await;
    rig.player.skip_to_next_strict().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_skip_crossfades_to_next_track() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![
            track(&rig.host, "a", 60.0),
            track(&rig.host, "b", 60.0),
        ])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(10.0).await;

    rig.player.skip_to_next().await.unwrap();
    run_for(6.0).await;
    let current = rig.player.current_track_metadata().await.unwrap();
    assert_eq!(current.title.as_deref(), Some("b"));

    run_for(1.0).await;
    rig.player.skip_to_previous().await.unwrap();
    run_for(6.0).await;
    let current = rig.player.current_track_metadata().await.unwrap();
    assert_eq!(current.title.as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn test_jump_to_out_of_range() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![track(&rig.host, "a", 30.0)])
        .await
        .unwrap();
    let err = rig.player.jump_to(7).await.unwrap_err();
    assert_eq!(err, Error::IndexOutOfRange { index: 7, len: 1 });
}

#[tokio::test(start_paused = true)]
async fn test_swap_playlist_while_playing() {
    let rig = rig(config()).await;
    let mut events = rig.player.subscribe_events();

    rig.player
        .load_playlist(vec![track(&rig.host, "old", 20.0)])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();
    run_for(4.0).await;

    let new_tracks = vec![
        track(&rig.host, "n1", 30.0),
        track(&rig.host, "n2", 30.0),
    ];
    rig.player.swap_playlist(new_tracks, secs(3.0)).await.unwrap();
    run_for(3.5).await;

    // The new head is active; its position counts from its physical start
    // at crossfade begin, so it reads ≈ the crossfade duration
    let current = rig.player.current_track_metadata().await.unwrap();
    assert_eq!(current.title.as_deref(), Some("n1"));
    let position = rig.player.position().await.unwrap().position;
    assert!(
        position >= secs(3.0) && position <= secs(4.5),
        "expected ≈3.5s into n1, got {:?}",
        position
    );

    let playlist = rig.player.get_playlist().await;
    assert_eq!(playlist.len(), 2);
    assert_eq!(playlist[0].metadata.title.as_deref(), Some("n1"));

    let mut saw_swap = false;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::PlaylistSwapped { track_count, crossfade, .. } = event {
            saw_swap = true;
            assert_eq!(track_count, 2);
            assert_eq!(crossfade, secs(3.0));
        }
    }
    assert!(saw_swap);
}

#[tokio::test(start_paused = true)]
async fn test_swap_playlist_while_idle_loads() {
    let rig = rig(config()).await;
    rig.player
        .swap_playlist(vec![track(&rig.host, "n1", 30.0)], secs(3.0))
        .await
        .unwrap();
    assert_eq!(rig.player.state(), PlayerState::Idle);
    assert_eq!(rig.player.get_playlist().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_volume_applies_on_master_only() {
    let rig = rig(config()).await;
    rig.player
        .load_playlist(vec![
            track(&rig.host, "a", 20.0),
            track(&rig.host, "b", 20.0),
        ])
        .await
        .unwrap();
    rig.player.start_playing(Some(secs(0.0))).await.unwrap();

    // Mid-crossfade, change the volume: master moves, voice ramps continue
    run_for(17.0).await;
    rig.player.set_volume(0.4).await.unwrap();
    assert_eq!(rig.host.gain(Gain::Master), 0.4);
    let mid_a = rig.host.gain(Gain::VoiceA);
    let mid_b = rig.host.gain(Gain::VoiceB);
    assert!(mid_a > 0.0 && mid_a < 1.0, "ramp untouched by volume, {mid_a}");
    assert!(mid_b > 0.0 && mid_b < 1.0, "ramp untouched by volume, {mid_b}");

    run_for(4.0).await;
    let gains = [rig.host.gain(Gain::VoiceA), rig.host.gain(Gain::VoiceB)];
    assert!(gains.contains(&1.0), "incoming voice at full gain, {gains:?}");
    assert_eq!(rig.host.gain(Gain::Master), 0.4);

    // Out-of-range input clamps
    rig.player.set_volume(2.0).await.unwrap();
    assert_eq!(rig.host.gain(Gain::Master), 1.0);
}
