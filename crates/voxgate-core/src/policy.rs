//! Platform quirk policy: the one place platform differences live.
//!
//! iOS WebKit tears down its audio session asynchronously after playback and
//! cold-starts its output pipeline, so it needs longer restart delays, a
//! silent unlock sample and a pre-warm pass. Every other platform uses the
//! short defaults. The policy is selected once at startup and consulted by
//! the lifecycle, the sessions and the coordinator; nothing else branches on
//! the platform.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Latency hint passed to the platform when the playback context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyHint {
    /// Lowest latency the platform offers.
    Interactive,
    /// Balanced latency and power use.
    Balanced,
    /// Favor glitch-free output over latency.
    Playback,
}

/// Parameters used to create the shared playback context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    pub sample_rate: u32,
    pub latency_hint: LatencyHint,
}

/// Device/browser-specific timing and warm-up requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformQuirkPolicy {
    /// Desktop browsers, Android, native hosts.
    #[default]
    Default,
    /// Safari / any WebKit view on iPhone, iPad or iPod.
    IosWebKit,
}

impl PlatformQuirkPolicy {
    /// Pick a policy from a user-agent string.
    ///
    /// iPadOS reports a desktop Safari user agent, so a `Macintosh` agent
    /// with more than one touch point is treated as iOS too.
    pub fn detect(user_agent: &str, max_touch_points: u32) -> Self {
        let ios_device = ["iPhone", "iPad", "iPod"]
            .iter()
            .any(|device| user_agent.contains(device));
        let desktop_mode_ipad = user_agent.contains("Macintosh") && max_touch_points > 1;

        let policy = if ios_device || desktop_mode_ipad {
            Self::IosWebKit
        } else {
            Self::Default
        };
        tracing::debug!(?policy, max_touch_points, "Platform quirk policy detected");
        policy
    }

    /// Debounce before re-starting capture after it ended or failed.
    pub const fn restart_delay(self) -> Duration {
        match self {
            Self::Default => Duration::from_millis(300),
            Self::IosWebKit => Duration::from_millis(600),
        }
    }

    /// Safety delay between the end of playback and the next capture start.
    ///
    /// On iOS this covers the audio-session teardown; starting capture
    /// earlier makes the recognizer fail or pick up the speaker tail.
    pub const fn post_playback_delay(self) -> Duration {
        match self {
            Self::Default => Duration::from_millis(300),
            Self::IosWebKit => Duration::from_millis(1200),
        }
    }

    /// Whether unlocking must push a near-silent single sample through the graph.
    pub const fn requires_unlock_sample(self) -> bool {
        matches!(self, Self::IosWebKit)
    }

    /// Whether the context needs a warm-up pass before the first utterance.
    pub const fn requires_pre_warm(self) -> bool {
        matches!(self, Self::IosWebKit)
    }

    /// Whether the capture engine can be trusted with continuous mode.
    pub const fn supports_continuous_capture(self) -> bool {
        matches!(self, Self::Default)
    }

    /// Context creation parameters.
    pub const fn context_params(self) -> ContextParams {
        match self {
            Self::Default => ContextParams {
                sample_rate: 48_000,
                latency_hint: LatencyHint::Interactive,
            },
            Self::IosWebKit => ContextParams {
                sample_rate: 44_100,
                latency_hint: LatencyHint::Interactive,
            },
        }
    }

    /// Short label used in logs and CLI output.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::IosWebKit => "ios_webkit",
        }
    }
}

impl fmt::Display for PlatformQuirkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
