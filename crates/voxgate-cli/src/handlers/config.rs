//! `voxgate config`: print the effective coordinator config.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use voxgate_core::{CaptureOptions, OverlapPolicy, PlatformQuirkPolicy, TurnConfig};

/// Config values after platform defaults are applied.
#[derive(Debug, Serialize)]
pub struct EffectiveConfig {
    pub platform: PlatformQuirkPolicy,
    pub restart_delay_ms: u64,
    pub post_playback_delay_ms: u64,
    pub capture_start_timeout_ms: u64,
    pub capture: CaptureOptions,
    pub stop_capture_on_final: bool,
    pub overlap: OverlapPolicy,
    pub max_consecutive_failures: u32,
}

impl EffectiveConfig {
    pub fn resolve(config: &TurnConfig, detected: PlatformQuirkPolicy) -> Self {
        let platform = config.resolve_policy(detected);
        Self {
            platform,
            restart_delay_ms: millis(config.restart_delay(platform)),
            post_playback_delay_ms: millis(config.post_playback_delay(platform)),
            capture_start_timeout_ms: config.capture_start_timeout_ms,
            capture: config.capture_options(platform),
            stop_capture_on_final: config.stop_capture_on_final,
            overlap: config.overlap,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Execute the config command.
pub fn execute(config: &TurnConfig) -> Result<()> {
    let effective = EffectiveConfig::resolve(config, PlatformQuirkPolicy::Default);
    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}
