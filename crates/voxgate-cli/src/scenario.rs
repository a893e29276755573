//! Scenario files for `voxgate simulate`.
//!
//! A scenario is a JSON document with an optional coordinator config and a
//! list of steps. Each step is either a host command (press the mic, speak),
//! something the platform does (capture started, playback ended), a wait on
//! the virtual clock, or an expectation about the resulting state.
//!
//! ```json
//! {
//!   "name": "barge-in",
//!   "steps": [
//!     { "action": "press" },
//!     { "action": "capture_started" },
//!     { "action": "speak", "text": "Hello there" },
//!     { "action": "expect", "state": "suspended", "intent": true },
//!     { "action": "playback_finished" },
//!     { "action": "wait", "ms": 300 },
//!     { "action": "expect", "state": "listening_pending_start" }
//!   ]
//! }
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use voxgate_core::{GestureKind, PlatformQuirkPolicy, TurnConfig, TurnState};

use crate::error::CliError;

/// A parsed scenario file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Display name; defaults to the file name.
    #[serde(default)]
    pub name: Option<String>,

    /// Config for this run. Replaces the `--config` file when present.
    #[serde(default)]
    pub config: Option<TurnConfig>,

    /// Platform policy to simulate.
    #[serde(default = "default_platform")]
    pub platform: PlatformQuirkPolicy,

    /// Finish playback automatically once the audio has played.
    #[serde(default)]
    pub auto_finish_playback: bool,

    /// Start the audio context suspended until a gesture unlocks it.
    #[serde(default)]
    pub locked_audio: bool,

    /// Report that no capture engine exists on this platform.
    #[serde(default)]
    pub capture_unavailable: bool,

    /// Virtual time each synthesis request takes.
    #[serde(default)]
    pub synthesis_latency_ms: u64,

    pub steps: Vec<Step>,
}

const fn default_platform() -> PlatformQuirkPolicy {
    PlatformQuirkPolicy::Default
}

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Press,
    Release,
    Speak {
        text: String,
    },
    StopSpeaking,
    CaptureStarted,
    CaptureResult {
        text: String,
        #[serde(default, rename = "final")]
        is_final: bool,
    },
    /// Platform error code such as `no-speech` or `not-allowed`.
    CaptureError {
        code: String,
    },
    CaptureEnded,
    /// Fire `ended` for the most recently started playback.
    PlaybackFinished,
    PlaybackFailed {
        detail: String,
    },
    Gesture {
        kind: GestureKind,
    },
    Visibility {
        visible: bool,
    },
    /// Advance the virtual clock.
    Wait {
        ms: u64,
    },
    /// Check the current snapshot. Unset fields are not checked.
    Expect {
        #[serde(default)]
        state: Option<TurnState>,
        #[serde(default)]
        intent: Option<bool>,
        #[serde(default)]
        playing: Option<bool>,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Press => write!(f, "press microphone"),
            Self::Release => write!(f, "release microphone"),
            Self::Speak { text } => write!(f, "speak {text:?}"),
            Self::StopSpeaking => write!(f, "stop speaking"),
            Self::CaptureStarted => write!(f, "capture started"),
            Self::CaptureResult { text, is_final } => {
                let kind = if *is_final { "final" } else { "interim" };
                write!(f, "capture {kind} result {text:?}")
            }
            Self::CaptureError { code } => write!(f, "capture error {code}"),
            Self::CaptureEnded => write!(f, "capture ended"),
            Self::PlaybackFinished => write!(f, "playback finished"),
            Self::PlaybackFailed { detail } => write!(f, "playback failed: {detail}"),
            Self::Gesture { kind } => write!(f, "gesture {kind:?}"),
            Self::Visibility { visible } => {
                write!(f, "page {}", if *visible { "visible" } else { "hidden" })
            }
            Self::Wait { ms } => write!(f, "wait {ms}ms"),
            Self::Expect { .. } => write!(f, "expect"),
        }
    }
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, CliError> {
        let scenario: Self =
            serde_json::from_str(json).map_err(|e| CliError::Scenario(e.to_string()))?;
        if scenario.steps.is_empty() {
            return Err(CliError::Scenario("scenario has no steps".to_string()));
        }
        if let Some(config) = &scenario.config {
            config.validate()?;
        }
        Ok(scenario)
    }

    pub fn from_path(path: &Path) -> Result<Self, CliError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("{}: {e}", path.display())))?;
        let mut scenario = Self::from_json_str(&json)?;
        if scenario.name.is_none() {
            scenario.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        Ok(scenario)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("scenario")
    }
}
