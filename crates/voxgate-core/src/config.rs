//! Coordinator configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Timing fields left unset fall back to the [`PlatformQuirkPolicy`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureOptions;
use crate::error::ConfigError;
use crate::policy::PlatformQuirkPolicy;

/// Longest delay accepted for any restart timer.
pub const MAX_DELAY_MS: u64 = 30_000;

/// Default time an attempt may stay pending before it is treated as failed.
pub const DEFAULT_CAPTURE_START_TIMEOUT_MS: u64 = 5_000;

/// Default number of consecutive capture failures tolerated before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// What happens when `request_speak` arrives while earlier speech is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Last write wins: the older request is interrupted.
    #[default]
    Interrupt,
    /// Requests play back to back in arrival order.
    Queue,
}

/// Configuration for the turn coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Force a platform policy instead of detecting one.
    pub platform: Option<PlatformQuirkPolicy>,

    /// Options passed to every capture attempt.
    pub capture: CaptureOptions,

    /// Override for the capture restart debounce.
    pub restart_delay_ms: Option<u64>,

    /// Override for the post-playback safety delay.
    pub post_playback_delay_ms: Option<u64>,

    /// How long an attempt may stay pending before it is abandoned.
    pub capture_start_timeout_ms: u64,

    /// Gracefully stop capture after each final result (intent is kept).
    pub stop_capture_on_final: bool,

    /// Overlapping speech policy.
    pub overlap: OverlapPolicy,

    /// Consecutive recoverable failures tolerated before intent is cleared.
    pub max_consecutive_failures: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            platform: None,
            capture: CaptureOptions::default(),
            restart_delay_ms: None,
            post_playback_delay_ms: None,
            capture_start_timeout_ms: DEFAULT_CAPTURE_START_TIMEOUT_MS,
            stop_capture_on_final: false,
            overlap: OverlapPolicy::Interrupt,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl TurnConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("restart_delay_ms", self.restart_delay_ms),
            ("post_playback_delay_ms", self.post_playback_delay_ms),
        ] {
            if let Some(ms) = value {
                if ms > MAX_DELAY_MS {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: format!("must be at most {MAX_DELAY_MS} ms, got {ms}"),
                    });
                }
            }
        }

        if !(500..=60_000).contains(&self.capture_start_timeout_ms) {
            return Err(ConfigError::Invalid {
                field: "capture_start_timeout_ms",
                reason: format!(
                    "must be between 500 and 60000 ms, got {}",
                    self.capture_start_timeout_ms
                ),
            });
        }

        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "max_consecutive_failures",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.capture.locale.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "capture.locale",
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Policy to use: the forced one, or the detected fallback.
    pub fn resolve_policy(&self, detected: PlatformQuirkPolicy) -> PlatformQuirkPolicy {
        self.platform.unwrap_or(detected)
    }

    /// Effective restart debounce.
    pub fn restart_delay(&self, policy: PlatformQuirkPolicy) -> Duration {
        self.restart_delay_ms
            .map_or_else(|| policy.restart_delay(), Duration::from_millis)
    }

    /// Effective post-playback safety delay.
    pub fn post_playback_delay(&self, policy: PlatformQuirkPolicy) -> Duration {
        self.post_playback_delay_ms
            .map_or_else(|| policy.post_playback_delay(), Duration::from_millis)
    }

    /// Pending-start watchdog duration.
    pub const fn capture_start_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_start_timeout_ms)
    }

    /// Capture options adjusted for what the platform can actually do.
    pub fn capture_options(&self, policy: PlatformQuirkPolicy) -> CaptureOptions {
        let mut options = self.capture.clone();
        if options.continuous && !policy.supports_continuous_capture() {
            options.continuous = false;
        }
        options
    }
}
