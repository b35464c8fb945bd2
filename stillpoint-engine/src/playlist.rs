//! Playlist manager
//!
//! Pure data: an ordered track list, the current index, and the repeat
//! counter. Repeat mode and limit are not stored here; the playback core
//! owns configuration and passes the repeat policy into every decision, so
//! there is exactly one copy of that state.
//!
//! `decide` answers "what would play next" without side effects; `advance`
//! applies the same rule and mutates. Direct navigation (`skip_to_next`,
//! `skip_to_previous`, `jump_to`) expresses user intent and ignores repeat
//! rules entirely.

use crate::error::{Error, Result};
use std::time::Duration;
use stillpoint_common::{RepeatMode, Track};
use tracing::debug;

/// Outcome of an advance decision at a loop boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceDecision {
    /// Move to a later track (no repeat counted)
    Next { index: usize },
    /// Repeat: stay on the same track or wrap to the head; counts toward
    /// the repeat limit
    Loop { index: usize },
    /// No next track; play out and finish
    Finish,
}

impl AdvanceDecision {
    /// Index of the track that plays next, if any
    pub fn target(&self) -> Option<usize> {
        match self {
            AdvanceDecision::Next { index } | AdvanceDecision::Loop { index } => Some(*index),
            AdvanceDecision::Finish => None,
        }
    }
}

/// Ordered playlist with a cursor
#[derive(Debug, Default)]
pub struct PlaylistManager {
    tracks: Vec<Track>,
    current_index: usize,
    repeats_completed: u32,
}

impl PlaylistManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace contents; cursor and repeat counter reset
    pub fn load(&mut self, tracks: Vec<Track>) -> Result<()> {
        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        debug!(count = tracks.len(), "playlist loaded");
        self.tracks = tracks;
        self.current_index = 0;
        self.repeats_completed = 0;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn repeats_completed(&self) -> u32 {
        self.repeats_completed
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }

    pub fn track_at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Cache a duration the host resolved on load
    pub fn set_track_duration(&mut self, index: usize, duration: Duration) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.duration = Some(duration);
        }
    }

    /// The advance rule, without side effects
    ///
    /// Repeats are bounded: when a decision would push the completed-repeat
    /// count past `repeat_limit`, it becomes `Finish`.
    pub fn decide(&self, mode: RepeatMode, repeat_limit: Option<u32>) -> AdvanceDecision {
        if self.tracks.is_empty() {
            return AdvanceDecision::Finish;
        }

        let last = self.tracks.len() - 1;
        let over_limit = |completed: u32| match repeat_limit {
            Some(limit) => completed + 1 > limit,
            None => false,
        };

        match mode {
            RepeatMode::Off => {
                if self.current_index < last {
                    AdvanceDecision::Next {
                        index: self.current_index + 1,
                    }
                } else {
                    AdvanceDecision::Finish
                }
            }
            RepeatMode::SingleTrack => {
                if over_limit(self.repeats_completed) {
                    AdvanceDecision::Finish
                } else {
                    AdvanceDecision::Loop {
                        index: self.current_index,
                    }
                }
            }
            RepeatMode::Playlist => {
                if self.current_index < last {
                    AdvanceDecision::Next {
                        index: self.current_index + 1,
                    }
                } else if over_limit(self.repeats_completed) {
                    AdvanceDecision::Finish
                } else {
                    AdvanceDecision::Loop { index: 0 }
                }
            }
        }
    }

    /// Non-mutating preview of the track `advance` would select
    pub fn what_plays_next(&self, mode: RepeatMode, repeat_limit: Option<u32>) -> Option<&Track> {
        self.decide(mode, repeat_limit)
            .target()
            .and_then(|index| self.tracks.get(index))
    }

    /// Apply the advance rule: move the cursor and count the repeat
    pub fn advance(&mut self, mode: RepeatMode, repeat_limit: Option<u32>) -> AdvanceDecision {
        let decision = self.decide(mode, repeat_limit);
        match decision {
            AdvanceDecision::Next { index } => {
                self.current_index = index;
            }
            AdvanceDecision::Loop { index } => {
                self.current_index = index;
                self.repeats_completed += 1;
            }
            AdvanceDecision::Finish => {}
        }
        decision
    }

    /// User-initiated move to the following track; not subject to repeat rules
    pub fn skip_to_next(&mut self) -> Result<&Track> {
        if self.tracks.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        if self.current_index + 1 >= self.tracks.len() {
            return Err(Error::NoNextTrack);
        }
        self.current_index += 1;
        Ok(&self.tracks[self.current_index])
    }

    /// User-initiated move to the preceding track
    pub fn skip_to_previous(&mut self) -> Result<&Track> {
        if self.tracks.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        if self.current_index == 0 {
            return Err(Error::NoPreviousTrack);
        }
        self.current_index -= 1;
        Ok(&self.tracks[self.current_index])
    }

    /// User-initiated jump to an arbitrary index
    pub fn jump_to(&mut self, index: usize) -> Result<&Track> {
        if index >= self.tracks.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }
        self.current_index = index;
        Ok(&self.tracks[index])
    }
}
