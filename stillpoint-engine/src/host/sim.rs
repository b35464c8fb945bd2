//! Simulated audio host for tests, benches, and development
//!
//! Implements [`AudioHost`] against the tokio clock instead of a device.
//! Under `#[tokio::test(start_paused = true)]` the render clock advances
//! only with `tokio::time::advance`, which makes scheduling and envelope
//! behavior exactly reproducible. Every gain write is journaled with its
//! frame time so tests can assert whole envelopes, and loads/schedules can
//! be made to fail on demand.

use super::{AudioHost, Gain, HostError, LoadedTrack, Voice};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use stillpoint_common::{time, Track, TrackSource};
use tokio::time::Instant;
use tracing::debug;

/// Default scheduling-latency cover: ~46 ms at 44.1 kHz
const DEFAULT_LEAD_FRAMES: u64 = 2048;

/// One recorded gain write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainWrite {
    pub at_frame: u64,
    pub value: f32,
}

#[derive(Debug, Default, Clone)]
struct VoiceSim {
    loaded: Option<(TrackSource, Duration)>,
    /// Render frame the current schedule started at
    scheduled_at: Option<u64>,
    /// Offset into the track at schedule time
    offset: Duration,
    /// Render frame the voice was paused at, while paused
    paused_at: Option<u64>,
}

/// In-process reference implementation of [`AudioHost`]
pub struct SimulatedHost {
    sample_rate: u32,
    lead_frames: u64,
    epoch: Instant,
    registry: Mutex<HashMap<TrackSource, Duration>>,
    voices: Mutex<HashMap<Voice, VoiceSim>>,
    gains: Mutex<HashMap<Gain, f32>>,
    gain_log: Mutex<Vec<(Gain, GainWrite)>>,
    fail_loads: AtomicU32,
    fail_schedules: AtomicU32,
}

impl SimulatedHost {
    pub fn new(sample_rate: u32) -> Self {
        let mut gains = HashMap::new();
        for gain in [Gain::VoiceA, Gain::VoiceB, Gain::Overlay, Gain::Master] {
            gains.insert(gain, 1.0);
        }
        Self {
            sample_rate,
            lead_frames: DEFAULT_LEAD_FRAMES,
            epoch: Instant::now(),
            registry: Mutex::new(HashMap::new()),
            voices: Mutex::new(HashMap::new()),
            gains: Mutex::new(gains),
            gain_log: Mutex::new(Vec::new()),
            fail_loads: AtomicU32::new(0),
            fail_schedules: AtomicU32::new(0),
        }
    }

    pub fn with_lead_frames(mut self, lead_frames: u64) -> Self {
        self.lead_frames = lead_frames;
        self
    }

    /// Register a source the host can "decode"
    pub fn register(&self, key: &str, duration: Duration) {
        self.register_source(TrackSource::named(key), duration);
    }

    pub fn register_source(&self, source: TrackSource, duration: Duration) {
        self.registry.lock().unwrap().insert(source, duration);
    }

    /// Make the next `n` loads fail with `LoadFailed`
    pub fn fail_next_loads(&self, n: u32) {
        self.fail_loads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` schedules fail with `SchedulingFailed`
    pub fn fail_next_schedules(&self, n: u32) {
        self.fail_schedules.store(n, Ordering::SeqCst);
    }

    /// Simulate an external engine reset: all voice state is lost
    pub fn wipe(&self) {
        self.voices.lock().unwrap().clear();
        debug!("simulated host wiped (external reset)");
    }

    // ------------------------------------------------------------------
    // Inspection helpers for tests
    // ------------------------------------------------------------------

    /// Frame the voice's current schedule started at, if scheduled
    pub fn scheduled_at(&self, voice: Voice) -> Option<u64> {
        self.voices
            .lock()
            .unwrap()
            .get(&voice)
            .and_then(|v| v.scheduled_at)
    }

    pub fn loaded_source(&self, voice: Voice) -> Option<TrackSource> {
        self.voices
            .lock()
            .unwrap()
            .get(&voice)
            .and_then(|v| v.loaded.as_ref().map(|(source, _)| source.clone()))
    }

    pub fn is_paused(&self, voice: Voice) -> bool {
        self.voices
            .lock()
            .unwrap()
            .get(&voice)
            .map(|v| v.paused_at.is_some())
            .unwrap_or(false)
    }

    /// Elapsed playback position of a scheduled voice
    pub fn voice_position(&self, voice: Voice) -> Option<Duration> {
        let voices = self.voices.lock().unwrap();
        let sim = voices.get(&voice)?;
        let started = sim.scheduled_at?;
        let now = sim.paused_at.unwrap_or_else(|| self.render_time_now());
        let played = now.saturating_sub(started);
        Some(sim.offset + time::duration_for(played, self.sample_rate))
    }

    /// All writes ever made to one gain node, in order
    pub fn gain_history(&self, gain: Gain) -> Vec<GainWrite> {
        self.gain_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(g, _)| *g == gain)
            .map(|(_, write)| *write)
            .collect()
    }

    pub fn clear_gain_history(&self) {
        self.gain_log.lock().unwrap().clear();
    }
}

#[async_trait]
impl AudioHost for SimulatedHost {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn lead_frames(&self) -> u64 {
        self.lead_frames
    }

    fn render_time_now(&self) -> u64 {
        let elapsed = Instant::now().duration_since(self.epoch);
        time::frames_for(elapsed, self.sample_rate)
    }

    async fn load(&self, voice: Voice, source: &TrackSource) -> Result<LoadedTrack, HostError> {
        if self.fail_loads.load(Ordering::SeqCst) > 0 {
            self.fail_loads.fetch_sub(1, Ordering::SeqCst);
            return Err(HostError::LoadFailed(format!(
                "injected load failure for {}",
                source.describe()
            )));
        }

        let duration = self
            .registry
            .lock()
            .unwrap()
            .get(source)
            .copied()
            .ok_or_else(|| {
                HostError::LoadFailed(format!("unknown source: {}", source.describe()))
            })?;

        let mut voices = self.voices.lock().unwrap();
        let sim = voices.entry(voice).or_default();
        sim.loaded = Some((source.clone(), duration));
        sim.scheduled_at = None;
        sim.paused_at = None;

        let mut track = Track::new(source.clone());
        track.duration = Some(duration);
        debug!(?voice, source = %source.describe(), ?duration, "simulated load");
        Ok(LoadedTrack {
            frames: time::frames_for(duration, self.sample_rate),
            duration,
            track,
        })
    }

    async fn schedule(
        &self,
        voice: Voice,
        at_frame: u64,
        offset: Duration,
    ) -> Result<(), HostError> {
        if self.fail_schedules.load(Ordering::SeqCst) > 0 {
            self.fail_schedules.fetch_sub(1, Ordering::SeqCst);
            return Err(HostError::SchedulingFailed("injected".into()));
        }

        let mut voices = self.voices.lock().unwrap();
        let sim = voices.entry(voice).or_default();
        if sim.loaded.is_none() {
            return Err(HostError::VoiceNotReady(voice));
        }
        sim.scheduled_at = Some(at_frame);
        sim.offset = offset;
        sim.paused_at = None;
        debug!(?voice, at_frame, ?offset, "simulated schedule");
        Ok(())
    }

    fn stop_voice(&self, voice: Voice) {
        if let Some(sim) = self.voices.lock().unwrap().get_mut(&voice) {
            sim.scheduled_at = None;
            sim.paused_at = None;
        }
    }

    fn pause_voice(&self, voice: Voice) {
        let now = self.render_time_now();
        if let Some(sim) = self.voices.lock().unwrap().get_mut(&voice) {
            if sim.scheduled_at.is_some() && sim.paused_at.is_none() {
                sim.paused_at = Some(now);
            }
        }
    }

    fn resume_voice(&self, voice: Voice) {
        let now = self.render_time_now();
        if let Some(sim) = self.voices.lock().unwrap().get_mut(&voice) {
            if let (Some(started), Some(paused)) = (sim.scheduled_at, sim.paused_at) {
                // Shift the schedule so elapsed-at-resume equals elapsed-at-pause
                let played = paused.saturating_sub(started);
                sim.scheduled_at = Some(now.saturating_sub(played));
                sim.paused_at = None;
            }
        }
    }

    fn unload(&self, voice: Voice) {
        self.voices.lock().unwrap().remove(&voice);
    }

    fn set_gain(&self, gain: Gain, value: f32) {
        let value = value.clamp(0.0, 1.0);
        let at_frame = self.render_time_now();
        self.gains.lock().unwrap().insert(gain, value);
        self.gain_log
            .lock()
            .unwrap()
            .push((gain, GainWrite { at_frame, value }));
    }

    fn gain(&self, gain: Gain) -> f32 {
        *self.gains.lock().unwrap().get(&gain).unwrap_or(&1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_tracks_paused_time() {
        let host = SimulatedHost::new(44_100);
        let start = host.render_time_now();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(host.render_time_now() - start, 88_200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_resolves_registered_duration() {
        let host = SimulatedHost::new(44_100);
        host.register("ocean", Duration::from_secs(30));

        let loaded = host
            .load(Voice::MainA, &TrackSource::named("ocean"))
            .await
            .unwrap();
        assert_eq!(loaded.duration, Duration::from_secs(30));
        assert_eq!(loaded.frames, 30 * 44_100);
        assert_eq!(loaded.track.duration, Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_unknown_source_fails() {
        let host = SimulatedHost::new(44_100);
        let err = host
            .load(Voice::MainA, &TrackSource::named("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::LoadFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_requires_load() {
        let host = SimulatedHost::new(44_100);
        let err = host
            .schedule(Voice::MainA, 1000, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, HostError::VoiceNotReady(Voice::MainA));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_position() {
        let host = SimulatedHost::new(44_100);
        host.register("a", Duration::from_secs(60));
        host.load(Voice::MainA, &TrackSource::named("a")).await.unwrap();
        host.schedule(Voice::MainA, host.render_time_now(), Duration::ZERO)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        host.pause_voice(Voice::MainA);
        let at_pause = host.voice_position(Voice::MainA).unwrap();

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(host.voice_position(Voice::MainA).unwrap(), at_pause);

        host.resume_voice(Voice::MainA);
        tokio::time::advance(Duration::from_secs(1)).await;
        let after = host.voice_position(Voice::MainA).unwrap();
        assert_eq!(after, at_pause + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gain_writes_clamped_and_journaled() {
        let host = SimulatedHost::new(44_100);
        host.set_gain(Gain::VoiceA, 1.5);
        host.set_gain(Gain::VoiceA, -0.5);
        assert_eq!(host.gain(Gain::VoiceA), 0.0);

        let history = host.gain_history(Gain::VoiceA);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, 1.0);
        assert_eq!(history[1].value, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_injection_counts_down() {
        let host = SimulatedHost::new(44_100);
        host.register("a", Duration::from_secs(10));
        host.fail_next_loads(1);

        assert!(host.load(Voice::MainA, &TrackSource::named("a")).await.is_err());
        assert!(host.load(Voice::MainA, &TrackSource::named("a")).await.is_ok());
    }
}
