//! Duration and sample-frame conversions
//!
//! Everything the engine schedules is expressed in sample frames at the
//! host's output rate; everything the API speaks is `std::time::Duration`.
//! These helpers are the single place that conversion happens, so position
//! reporting and crossfade start times always agree.

use std::time::Duration;

/// Sample frames covering `duration` at `sample_rate`
///
/// Rounds to the nearest frame; exact for the usual rates and the
/// millisecond-granular durations the API hands in.
pub fn frames_for(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * sample_rate as f64).round() as u64
}

/// Duration covered by `frames` at `sample_rate`
pub fn duration_for(frames: u64, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

/// Seconds covered by `frames` at `sample_rate`
pub fn seconds_for(frames: u64, sample_rate: u32) -> f64 {
    frames as f64 / sample_rate as f64
}
