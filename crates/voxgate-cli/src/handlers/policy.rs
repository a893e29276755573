//! `voxgate policy`: show the platform quirk policy a browser would get.

use std::fmt::Write as _;

use anyhow::Result;
use voxgate_core::PlatformQuirkPolicy;

/// Execute the policy command.
///
/// Without a user agent the default policy is shown.
pub fn execute(user_agent: Option<&str>, max_touch_points: u32) -> Result<()> {
    let policy = user_agent.map_or(PlatformQuirkPolicy::Default, |ua| {
        PlatformQuirkPolicy::detect(ua, max_touch_points)
    });
    print!("{}", render(policy)?);
    Ok(())
}

/// Human-readable summary of everything `policy` controls.
pub fn render(policy: PlatformQuirkPolicy) -> Result<String> {
    let params = policy.context_params();
    let mut out = String::new();
    writeln!(out, "Platform policy:     {policy}")?;
    writeln!(out, "Restart delay:       {}ms", policy.restart_delay().as_millis())?;
    writeln!(
        out,
        "Post-playback delay: {}ms",
        policy.post_playback_delay().as_millis()
    )?;
    writeln!(out, "Unlock sample:       {}", yes_no(policy.requires_unlock_sample()))?;
    writeln!(out, "Pre-warm:            {}", yes_no(policy.requires_pre_warm()))?;
    writeln!(
        out,
        "Continuous capture:  {}",
        yes_no(policy.supports_continuous_capture())
    )?;
    writeln!(
        out,
        "Context:             {} Hz, {:?} latency",
        params.sample_rate, params.latency_hint
    )?;
    Ok(out)
}

const fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ios_timings() {
        let text = render(PlatformQuirkPolicy::IosWebKit).unwrap();
        assert!(text.contains("ios_webkit"));
        assert!(text.contains("Restart delay:       600ms"));
        assert!(text.contains("Post-playback delay: 1200ms"));
        assert!(text.contains("Continuous capture:  no"));
        assert!(text.contains("44100 Hz"));
    }

    #[test]
    fn renders_default_flags() {
        let text = render(PlatformQuirkPolicy::Default).unwrap();
        assert!(text.contains("Unlock sample:       no"));
        assert!(text.contains("Continuous capture:  yes"));
    }
}
