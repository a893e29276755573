//! Error types for the turn-taking core.
//!
//! Capture failures are normalized into [`CaptureErrorKind`] no matter which
//! platform engine produced them; the coordinator only ever reasons about
//! that taxonomy.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors returned by the public coordinator API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    /// Capture was reported unsupported earlier in this session.
    #[error("Speech capture is not available on this platform")]
    CaptureUnavailable,

    /// `request_speak` was called with blank text.
    #[error("Nothing to speak: text is empty")]
    NothingToSpeak,

    /// The coordinator task has shut down.
    #[error("Turn coordinator is no longer running")]
    CoordinatorStopped,
}

/// Normalized capture error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CaptureErrorKind {
    /// Nothing was said before the engine gave up.
    #[error("No speech detected")]
    NoSpeech,

    /// Microphone access was refused.
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// The input device is busy or missing (usually transient).
    #[error("Audio input device unavailable")]
    DeviceUnavailable,

    /// The recognition service could not be reached.
    #[error("Speech recognition network error")]
    NetworkError,

    /// The caller stopped capture explicitly.
    #[error("Capture aborted")]
    Aborted,

    /// Anything the platform reported that has no better mapping.
    #[error("Capture error: {0}")]
    Unknown(String),
}

impl CaptureErrorKind {
    /// Map a platform error code (Web Speech style) to the taxonomy.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "no-speech" | "no_speech" | "nospeech" => Self::NoSpeech,
            "not-allowed" | "service-not-allowed" | "permission-denied" | "notallowederror" => {
                Self::PermissionDenied
            }
            "audio-capture" | "device-unavailable" | "notreadableerror" | "notfounderror" => {
                Self::DeviceUnavailable
            }
            "network" | "network-error" => Self::NetworkError,
            "aborted" | "abort" => Self::Aborted,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Terminal errors clear capture intent and are surfaced to the user.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    /// Failures that count against the consecutive-failure budget.
    ///
    /// `NoSpeech` and `Aborted` are normal outcomes of an idle microphone.
    pub const fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable | Self::NetworkError | Self::Unknown(_)
        )
    }
}

/// Why a capture attempt could not be started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureStartError {
    /// No capture engine exists on this host.
    #[error("Speech capture is not supported on this platform")]
    UnsupportedPlatform,

    /// The engine exists but refused to start.
    #[error("Capture engine failed to start: {0}")]
    Engine(CaptureErrorKind),
}

/// Why a playback request ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlaybackFailure {
    /// The shared audio context could not be created.
    #[error("Audio output is unavailable")]
    ContextUnavailable,

    /// Text-to-speech produced no audio.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// The playback engine reported an error.
    #[error("Audio playback failed: {0}")]
    Engine(String),
}

/// Errors reported by an external speech synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// The provider rejected or failed the request.
    #[error("Synthesis provider error: {0}")]
    Provider(String),

    /// The provider returned an empty buffer.
    #[error("Synthesis returned no audio")]
    EmptyAudio,
}

/// Errors reported by a platform audio context.
///
/// These never cross the lifecycle boundary; they are logged and retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The platform refused to create a context.
    #[error("Failed to create audio context: {0}")]
    Create(String),

    /// `resume()` was rejected (typically no user activation yet).
    #[error("Audio context resume rejected: {0}")]
    Resume(String),

    /// Building or running a warm-up graph failed.
    #[error("Audio graph error: {0}")]
    Graph(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading a config file.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed JSON.
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of its accepted range.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_speech_codes_map_to_taxonomy() {
        assert_eq!(CaptureErrorKind::from_code("no-speech"), CaptureErrorKind::NoSpeech);
        assert_eq!(
            CaptureErrorKind::from_code("not-allowed"),
            CaptureErrorKind::PermissionDenied
        );
        assert_eq!(
            CaptureErrorKind::from_code("service-not-allowed"),
            CaptureErrorKind::PermissionDenied
        );
        assert_eq!(
            CaptureErrorKind::from_code("audio-capture"),
            CaptureErrorKind::DeviceUnavailable
        );
        assert_eq!(CaptureErrorKind::from_code("network"), CaptureErrorKind::NetworkError);
        assert_eq!(CaptureErrorKind::from_code(" Aborted "), CaptureErrorKind::Aborted);
        assert_eq!(
            CaptureErrorKind::from_code("language-not-supported"),
            CaptureErrorKind::Unknown("language-not-supported".to_string())
        );
    }

    #[test]
    fn only_permission_denied_is_terminal() {
        assert!(CaptureErrorKind::PermissionDenied.is_terminal());
        assert!(!CaptureErrorKind::NoSpeech.is_terminal());
        assert!(!CaptureErrorKind::NetworkError.is_terminal());
        assert!(!CaptureErrorKind::Aborted.is_terminal());
    }

    #[test]
    fn idle_microphone_outcomes_do_not_count_as_failures() {
        assert!(!CaptureErrorKind::NoSpeech.counts_as_failure());
        assert!(!CaptureErrorKind::Aborted.counts_as_failure());
        assert!(CaptureErrorKind::DeviceUnavailable.counts_as_failure());
        assert!(CaptureErrorKind::Unknown("x".into()).counts_as_failure());
    }
}
