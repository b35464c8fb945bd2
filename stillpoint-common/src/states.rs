//! Player lifecycle and overlay state machines
//!
//! The lifecycle machine is a tagged state enum with a total transition
//! table over `(state × event)`. The operation queue consults the table
//! before dispatching a command; pairs the table does not permit are
//! rejected as invalid-state errors without touching the player.

use serde::{Deserialize, Serialize};

/// Main player lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    #[default]
    Idle,
    Preparing,
    Playing,
    Paused,
    FadingOut,
    Finished,
    Failed,
}

impl PlayerState {
    /// Whether playback is audible or about to be
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerState::Preparing | PlayerState::Playing | PlayerState::FadingOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Preparing => "preparing",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::FadingOut => "fading_out",
            PlayerState::Finished => "finished",
            PlayerState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events driving lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Load,
    Start,
    Pause,
    Resume,
    Stop,
    AdvanceComplete,
    Error,
    FadeOutDone,
}

impl PlayerState {
    /// Transition table: `Some(next)` for a legal transition, `None` otherwise
    ///
    /// The table is total over every `(state, event)` pair; callers map
    /// `None` to an invalid-state error. `Failed` is only left via a fresh
    /// load or a stop, `Finished` is terminal until a new load or start.
    pub fn transition(&self, event: LifecycleEvent) -> Option<PlayerState> {
        use LifecycleEvent::*;
        use PlayerState::*;

        match (self, event) {
            (Idle, Load) => Some(Idle),
            (Idle, Start) => Some(Preparing),
            (Idle, Error) => Some(Failed),

            (Preparing, Load) => Some(Preparing),
            (Preparing, Start) => Some(Playing),
            (Preparing, Stop) => Some(Finished),
            (Preparing, AdvanceComplete) => Some(Playing),
            (Preparing, Error) => Some(Failed),

            (Playing, Load) => Some(Preparing),
            (Playing, Pause) => Some(Paused),
            (Playing, Stop) => Some(FadingOut),
            (Playing, AdvanceComplete) => Some(Playing),
            (Playing, Error) => Some(Failed),

            (Paused, Load) => Some(Preparing),
            (Paused, Start) => Some(Playing),
            (Paused, Resume) => Some(Playing),
            (Paused, Stop) => Some(Finished),
            (Paused, Error) => Some(Failed),

            // Pause may interrupt an in-flight fade-out; the frozen fade
            // resumes from where it stopped
            (FadingOut, Pause) => Some(Paused),
            (FadingOut, Stop) => Some(Finished),
            (FadingOut, Error) => Some(Failed),
            (FadingOut, FadeOutDone) => Some(Finished),

            (Finished, Load) => Some(Preparing),
            (Finished, Start) => Some(Playing),
            (Finished, Stop) => Some(Finished),
            (Finished, Error) => Some(Failed),

            (Failed, Load) => Some(Preparing),
            (Failed, Stop) => Some(Finished),

            _ => None,
        }
    }

    /// Whether `event` is currently legal
    pub fn permits(&self, event: LifecycleEvent) -> bool {
        self.transition(event).is_some()
    }
}

/// Overlay voice states, a deliberately smaller machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
    #[default]
    Idle,
    Preparing,
    Playing,
    Paused,
    Stopping,
}

impl OverlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayState::Idle => "idle",
            OverlayState::Preparing => "preparing",
            OverlayState::Playing => "playing",
            OverlayState::Paused => "paused",
            OverlayState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for OverlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
