//! Observable coordinator state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextState;
use crate::playback::{PlaybackHandle, PlaybackOutcome};

/// Mechanical state of the turn-taking machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No capture intent.
    Idle,
    /// Capture confirmed running.
    Listening,
    /// Capture requested, engine not yet confirmed.
    ListeningPendingStart,
    /// Capture intent held while playback owns the device.
    Suspended,
    /// A capture restart timer is armed.
    RestartScheduled,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::ListeningPendingStart => "listening_pending_start",
            Self::Suspended => "suspended",
            Self::RestartScheduled => "restart_scheduled",
        };
        f.write_str(label)
    }
}

/// The three states a microphone button renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    Idle,
    Listening,
    WaitingToRestart,
}

/// Category of an error shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfacedErrorKind {
    /// Capture cannot continue until the user acts.
    TerminalCapture,
    /// A playback request failed; capture is unaffected.
    PlaybackFailure,
}

/// A user-visible error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfacedError {
    pub kind: SurfacedErrorKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl SurfacedError {
    pub fn new(kind: SurfacedErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Coalesced state pushed to subscribers on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSnapshot {
    pub turn_state: TurnState,
    pub capture_intent: bool,
    pub last_error: Option<SurfacedError>,
    pub capture_supported: bool,
    pub playback_active: bool,
    pub context_state: ContextState,
}

impl TurnSnapshot {
    /// State at coordinator construction.
    pub const fn initial(context_state: ContextState) -> Self {
        Self {
            turn_state: TurnState::Idle,
            capture_intent: false,
            last_error: None,
            capture_supported: true,
            playback_active: false,
            context_state,
        }
    }

    /// Which of the three microphone visuals to render.
    ///
    /// Intent without confirmed capture is its own state so a pending or
    /// restarting microphone never looks either idle or live.
    pub const fn visual_state(&self) -> VisualState {
        match (self.capture_intent, self.turn_state) {
            (_, TurnState::Listening) => VisualState::Listening,
            (true, _) => VisualState::WaitingToRestart,
            (false, _) => VisualState::Idle,
        }
    }
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The turn state changed.
    StateChanged(TurnState),

    /// A transcript was produced by capture.
    Transcript {
        /// The transcribed text.
        text: String,
        /// Whether this is a final or interim result.
        is_final: bool,
    },

    /// Playback started for a handle.
    SpeakingStarted(PlaybackHandle),

    /// A handle reached its terminal outcome.
    SpeakingFinished {
        handle: PlaybackHandle,
        outcome: PlaybackOutcome,
    },

    /// An error was surfaced to the user.
    Error(SurfacedError),
}
