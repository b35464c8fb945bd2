//! Player and overlay configuration
//!
//! `PlayerConfig` is the single owner of playback policy: the playlist
//! manager reads repeat fields through it and nothing else keeps a copy.
//! Numeric fields are validated at the seconds-based edge (NaN and
//! infinities rejected, ranges clamped) so the rest of the engine only
//! ever sees well-formed values.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stillpoint_common::{FadeCurve, LoopMode, RepeatMode};

/// Crossfade duration bounds in seconds
pub const CROSSFADE_MIN_SECS: f64 = 1.0;
pub const CROSSFADE_MAX_SECS: f64 = 30.0;

/// Fraction of a track's duration the fade zone may occupy
pub const CROSSFADE_MAX_TRACK_FRACTION: f64 = 0.4;

/// Default seek-with-fade duration
pub const SEEK_FADE_DEFAULT: Duration = Duration::from_millis(100);

/// Who configures the platform audio session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// The engine configures and activates the session itself
    #[default]
    Managed,
    /// The embedder owns the session; the engine only validates it
    External,
}

/// Main player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    crossfade: Duration,
    fade_curve: FadeCurve,
    repeat_mode: RepeatMode,
    repeat_limit: Option<u32>,
    volume: f32,
    mix_with_others: bool,
    session_mode: SessionMode,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            crossfade: Duration::from_secs(10),
            fade_curve: FadeCurve::default(),
            repeat_mode: RepeatMode::Off,
            repeat_limit: None,
            volume: 1.0,
            mix_with_others: false,
            session_mode: SessionMode::Managed,
        }
    }
}

impl PlayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the crossfade duration in seconds, clamped to [1.0, 30.0]
    ///
    /// NaN and infinite values are rejected rather than clamped.
    pub fn with_crossfade_secs(mut self, secs: f64) -> Result<Self> {
        if !secs.is_finite() {
            return Err(Error::invalid_parameter(
                "crossfade_duration",
                "must be a finite number of seconds",
            ));
        }
        let clamped = secs.clamp(CROSSFADE_MIN_SECS, CROSSFADE_MAX_SECS);
        self.crossfade = Duration::from_secs_f64(clamped);
        Ok(self)
    }

    pub fn with_fade_curve(mut self, curve: FadeCurve) -> Self {
        self.fade_curve = curve;
        self
    }

    pub fn with_repeat_mode(mut self, mode: RepeatMode) -> Self {
        self.repeat_mode = mode;
        self
    }

    /// Bound the number of completed repeats; `None` means unbounded
    pub fn with_repeat_limit(mut self, limit: Option<u32>) -> Result<Self> {
        if limit == Some(0) {
            return Err(Error::invalid_parameter("repeat_limit", "must be >= 1"));
        }
        self.repeat_limit = limit;
        Ok(self)
    }

    /// Set the master volume, clamped to [0.0, 1.0]
    pub fn with_volume(mut self, volume: f32) -> Result<Self> {
        if !volume.is_finite() {
            return Err(Error::invalid_parameter("volume", "must be finite"));
        }
        self.volume = volume.clamp(0.0, 1.0);
        Ok(self)
    }

    pub fn with_mix_with_others(mut self, mix: bool) -> Self {
        self.mix_with_others = mix;
        self
    }

    pub fn with_session_mode(mut self, mode: SessionMode) -> Self {
        self.session_mode = mode;
        self
    }

    pub fn crossfade(&self) -> Duration {
        self.crossfade
    }

    pub fn fade_curve(&self) -> FadeCurve {
        self.fade_curve
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn repeat_limit(&self) -> Option<u32> {
        self.repeat_limit
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn mix_with_others(&self) -> bool {
        self.mix_with_others
    }

    pub fn session_mode(&self) -> SessionMode {
        self.session_mode
    }

    /// Default fade-in used by `start_playing` when none is given
    pub fn fade_in_default(&self) -> Duration {
        self.crossfade.mul_f64(0.3)
    }

    pub(crate) fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

/// Crossfade duration adapted to the track being left
///
/// Short tracks would otherwise spend most of their runtime inside the
/// fade zone; the adapted duration caps the zone at 40% of the track. The
/// same value feeds both the envelope and the auto-advance trigger so the
/// two can never disagree.
pub fn adapted_crossfade(configured: Duration, track_duration: Duration) -> Duration {
    configured.min(track_duration.mul_f64(CROSSFADE_MAX_TRACK_FRACTION))
}

/// Overlay voice configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub loop_mode: LoopMode,
    /// Silence between loop iterations
    pub loop_delay: Duration,
    pub volume: f32,
    pub fade_in: Duration,
    pub fade_out: Duration,
    pub fade_curve: FadeCurve,
    /// When true every iteration gets its own fade-in/out (bells); when
    /// false fade-in runs once at first play and fade-out once at the
    /// final iteration (rain)
    pub fade_each_loop: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            loop_mode: LoopMode::Once,
            loop_delay: Duration::ZERO,
            volume: 1.0,
            fade_in: Duration::ZERO,
            fade_out: Duration::ZERO,
            fade_curve: FadeCurve::default(),
            fade_each_loop: false,
        }
    }
}

impl OverlayConfig {
    /// Validate field combinations that the type system cannot express
    pub fn validate(&self) -> Result<()> {
        if let LoopMode::Count { n: 0 } = self.loop_mode {
            return Err(Error::invalid_parameter("loop_mode", "count must be >= 1"));
        }
        if !self.volume.is_finite() || !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::invalid_parameter("volume", "must be in [0.0, 1.0]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfade_clamped() {
        let config = PlayerConfig::new().with_crossfade_secs(0.2).unwrap();
        assert_eq!(config.crossfade(), Duration::from_secs(1));

        let config = PlayerConfig::new().with_crossfade_secs(45.0).unwrap();
        assert_eq!(config.crossfade(), Duration::from_secs(30));

        let config = PlayerConfig::new().with_crossfade_secs(12.5).unwrap();
        assert_eq!(config.crossfade(), Duration::from_secs_f64(12.5));
    }

    #[test]
    fn test_crossfade_rejects_non_finite() {
        assert!(PlayerConfig::new().with_crossfade_secs(f64::NAN).is_err());
        assert!(PlayerConfig::new().with_crossfade_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_volume_clamped() {
        let config = PlayerConfig::new().with_volume(1.7).unwrap();
        assert_eq!(config.volume(), 1.0);
        let config = PlayerConfig::new().with_volume(-0.3).unwrap();
        assert_eq!(config.volume(), 0.0);
        assert!(PlayerConfig::new().with_volume(f32::NAN).is_err());
    }

    #[test]
    fn test_repeat_limit_zero_rejected() {
        assert!(PlayerConfig::new().with_repeat_limit(Some(0)).is_err());
        assert!(PlayerConfig::new().with_repeat_limit(Some(1)).is_ok());
        assert!(PlayerConfig::new().with_repeat_limit(None).is_ok());
    }

    #[test]
    fn test_fade_in_default_is_30_percent() {
        let config = PlayerConfig::new().with_crossfade_secs(10.0).unwrap();
        assert_eq!(config.fade_in_default(), Duration::from_secs(3));
    }

    #[test]
    fn test_adapted_crossfade_bounds() {
        // Never exceeds the configured duration nor 40% of the track
        for configured_secs in [1.0f64, 4.0, 10.0, 30.0] {
            for track_secs in [0.5f64, 5.0, 10.0, 60.0, 600.0] {
                let configured = Duration::from_secs_f64(configured_secs);
                let track = Duration::from_secs_f64(track_secs);
                let adapted = adapted_crossfade(configured, track);
                assert!(adapted <= configured);
                assert!(
                    adapted.as_secs_f64() <= track_secs * CROSSFADE_MAX_TRACK_FRACTION + 1e-9
                );
            }
        }
    }

    #[test]
    fn test_adapted_crossfade_examples() {
        // 4s configured, 10s track: 4s wins over the 4s cap
        assert_eq!(
            adapted_crossfade(Duration::from_secs(4), Duration::from_secs(10)),
            Duration::from_secs(4)
        );
        // 10s configured, 5s track: capped at 2s
        assert_eq!(
            adapted_crossfade(Duration::from_secs(10), Duration::from_secs(5)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_overlay_validation() {
        let config = OverlayConfig {
            loop_mode: LoopMode::Count { n: 0 },
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OverlayConfig {
            volume: 1.5,
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(OverlayConfig::default().validate().is_ok());
    }
}
