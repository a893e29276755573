//! `voxgate simulate`: replay a scenario against scripted engines.
//!
//! The coordinator runs exactly as it would in a host, except that its
//! capture, playback, context and synthesis collaborators are the scripted
//! probes from `voxgate_core::testing` and time is virtual. Restart timers,
//! start watchdogs and auto-finishing playback all fire at their exact
//! virtual instants, so a scenario's timeline is reproducible.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use voxgate_core::testing::{ContextProbe, ScriptedPlatform};
use voxgate_core::{
    CoordinatorHandle, PlatformQuirkPolicy, PlaybackOutcome, TurnConfig, TurnError, TurnEvent,
    TurnSnapshot, TurnState,
};

use crate::error::CliError;
use crate::scenario::{Scenario, Step};

/// Yields handed to the coordinator and engine tasks after each step.
const SETTLE_YIELDS: usize = 16;

/// What a timeline line records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A scenario step was applied.
    Step,
    /// The coordinator emitted an event.
    Event,
    /// Feedback on a step: an expectation result or a rejected command.
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Virtual milliseconds since the scenario started.
    pub at_ms: u64,
    pub kind: EntryKind,
    pub line: String,
}

/// Result of one simulation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub name: String,
    pub policy: PlatformQuirkPolicy,
    pub timeline: Vec<TimelineEntry>,
    /// Failed expectations, one line each.
    pub failures: Vec<String>,
    pub final_snapshot: TurnSnapshot,
}

impl SimulationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Timeline lines of one kind.
    pub fn lines(&self, kind: EntryKind) -> impl Iterator<Item = &str> {
        self.timeline
            .iter()
            .filter(move |entry| entry.kind == kind)
            .map(|entry| entry.line.as_str())
    }
}

/// Execute the simulate command.
///
/// Pauses the runtime clock, so it must run on a current-thread runtime.
pub async fn execute(path: &Path, json: bool, base: &TurnConfig) -> Result<()> {
    let scenario = Scenario::from_path(path)?;

    tokio::time::pause();
    let report = run(&scenario, base).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report)?;
    }

    if report.passed() {
        Ok(())
    } else {
        Err(CliError::Expectation(format!(
            "{} expectation(s) failed in {}",
            report.failures.len(),
            report.name
        ))
        .into())
    }
}

/// Run `scenario` to completion. The caller owns the clock; on a paused
/// runtime every timer fires at its exact virtual instant.
///
/// `base` is used unless the scenario embeds its own config.
pub async fn run(scenario: &Scenario, base: &TurnConfig) -> Result<SimulationReport, CliError> {
    let config = scenario.config.clone().unwrap_or_else(|| base.clone());

    let platform = ScriptedPlatform {
        context: if scenario.locked_audio {
            ContextProbe::locked()
        } else {
            ContextProbe::new()
        },
        ..ScriptedPlatform::new()
    };
    platform.capture.set_supported(!scenario.capture_unavailable);
    platform.playback.set_auto_finish(scenario.auto_finish_playback);
    platform
        .synthesizer
        .set_latency(Duration::from_millis(scenario.synthesis_latency_ms));

    let (handle, events) =
        CoordinatorHandle::spawn(config, scenario.platform, platform.collaborators())?;
    let policy = handle.policy();

    tracing::info!(
        scenario = scenario.display_name(),
        %policy,
        steps = scenario.steps.len(),
        "Running scenario"
    );

    let mut sim = Simulator {
        handle,
        events,
        platform,
        started: Instant::now(),
        timeline: Vec::new(),
        failures: Vec::new(),
    };
    sim.settle().await;

    for (index, step) in scenario.steps.iter().enumerate() {
        sim.record(EntryKind::Step, step.to_string());
        sim.apply(index + 1, step).await?;
        sim.settle().await;
    }

    let final_snapshot = sim.handle.snapshot();
    sim.handle.shutdown().await?;

    tracing::info!(
        scenario = scenario.display_name(),
        failures = sim.failures.len(),
        "Scenario finished"
    );

    Ok(SimulationReport {
        name: scenario.display_name().to_string(),
        policy,
        timeline: sim.timeline,
        failures: sim.failures,
        final_snapshot,
    })
}

fn print_report(report: &SimulationReport) -> Result<()> {
    println!("Scenario: {} (policy: {})", report.name, report.policy);
    println!();
    for entry in &report.timeline {
        let marker = match entry.kind {
            EntryKind::Step => ">",
            EntryKind::Event | EntryKind::Check => " ",
        };
        println!("{:>7}ms {marker} {}", entry.at_ms, entry.line);
    }
    println!();
    println!("Final snapshot:");
    println!("{}", serde_json::to_string_pretty(&report.final_snapshot)?);
    println!();
    if report.passed() {
        println!("✓ All expectations held");
    } else {
        for failure in &report.failures {
            println!("✗ {failure}");
        }
    }
    Ok(())
}

// ── Simulator ──────────────────────────────────────────────────────

struct Simulator {
    handle: CoordinatorHandle,
    events: UnboundedReceiver<TurnEvent>,
    platform: ScriptedPlatform,
    started: Instant,
    timeline: Vec<TimelineEntry>,
    failures: Vec<String>,
}

impl Simulator {
    async fn apply(&mut self, number: usize, step: &Step) -> Result<(), CliError> {
        match step {
            Step::Press => {
                let result = self.handle.press_microphone().await;
                self.command_result(result)?;
            }
            Step::Release => self.handle.release_microphone().await?,
            Step::Speak { text } => match self.handle.request_speak(text.as_str()).await {
                Ok(request) => {
                    self.record(EntryKind::Check, format!("request #{}", request.handle().seq()));
                }
                Err(err) => self.command_result(Err(err))?,
            },
            Step::StopSpeaking => self.handle.stop_speaking().await?,
            Step::CaptureStarted => self.platform.capture.emit_started(),
            Step::CaptureResult { text, is_final } => {
                self.platform.capture.emit_result(text, *is_final);
            }
            Step::CaptureError { code } => self.platform.capture.emit_error(code),
            Step::CaptureEnded => self.platform.capture.emit_ended(),
            Step::PlaybackFinished => {
                if self.platform.playback.finish_latest().is_none() {
                    self.record(EntryKind::Check, "no playback has started".to_string());
                }
            }
            Step::PlaybackFailed { detail } => match self.platform.playback.latest_handle() {
                Some(handle) => self.platform.playback.fail(handle, detail),
                None => self.record(EntryKind::Check, "no playback has started".to_string()),
            },
            Step::Gesture { kind } => {
                if self.handle.gesture(*kind).await? {
                    self.record(EntryKind::Check, "audio unlocked".to_string());
                }
            }
            Step::Visibility { visible } => {
                if self.handle.visibility_changed(*visible).await? {
                    self.record(EntryKind::Check, "audio context resumed".to_string());
                }
            }
            Step::Wait { ms } => self.wait(Duration::from_millis(*ms)).await,
            Step::Expect {
                state,
                intent,
                playing,
            } => self.expect(number, *state, *intent, *playing),
        }
        Ok(())
    }

    /// Commands the coordinator may refuse are part of the scenario; only a
    /// stopped coordinator aborts the run.
    fn command_result(&mut self, result: Result<(), TurnError>) -> Result<(), CliError> {
        match result {
            Ok(()) => Ok(()),
            Err(TurnError::CoordinatorStopped) => Err(TurnError::CoordinatorStopped.into()),
            Err(err) => {
                self.record(EntryKind::Check, format!("rejected: {err}"));
                Ok(())
            }
        }
    }

    fn expect(
        &mut self,
        number: usize,
        state: Option<TurnState>,
        intent: Option<bool>,
        playing: Option<bool>,
    ) {
        let snapshot = self.handle.snapshot();
        let mut checked = Vec::new();
        let mut mismatches = Vec::new();

        if let Some(expected) = state {
            checked.push(format!("state {expected}"));
            if snapshot.turn_state != expected {
                mismatches.push(format!("state is {} (expected {expected})", snapshot.turn_state));
            }
        }
        if let Some(expected) = intent {
            checked.push(format!("intent {expected}"));
            if snapshot.capture_intent != expected {
                mismatches.push(format!(
                    "intent is {} (expected {expected})",
                    snapshot.capture_intent
                ));
            }
        }
        if let Some(expected) = playing {
            checked.push(format!("playing {expected}"));
            if snapshot.playback_active != expected {
                mismatches.push(format!(
                    "playing is {} (expected {expected})",
                    snapshot.playback_active
                ));
            }
        }

        if mismatches.is_empty() {
            self.record(EntryKind::Check, format!("✓ {}", checked.join(", ")));
        } else {
            let failure = format!("step {number}: {}", mismatches.join(", "));
            self.record(EntryKind::Check, format!("✗ {}", mismatches.join(", ")));
            self.failures.push(failure);
        }
    }

    /// Let virtual time pass, recording events at the instant they arrive.
    async fn wait(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            tokio::select! {
                biased;

                Some(event) = self.events.recv() => self.record_event(&event),

                () = tokio::time::sleep_until(deadline) => break,
            }
        }
    }

    /// Give spawned tasks a chance to run, then collect what they emitted.
    async fn settle(&mut self) {
        for _ in 0..SETTLE_YIELDS {
            tokio::task::yield_now().await;
        }
        while let Ok(event) = self.events.try_recv() {
            self.record_event(&event);
        }
    }

    fn record_event(&mut self, event: &TurnEvent) {
        self.record(EntryKind::Event, describe_event(event));
    }

    fn record(&mut self, kind: EntryKind, line: String) {
        let at_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.timeline.push(TimelineEntry { at_ms, kind, line });
    }
}

fn describe_event(event: &TurnEvent) -> String {
    match event {
        TurnEvent::StateChanged(state) => format!("state -> {state}"),
        TurnEvent::Transcript { text, is_final } => {
            let kind = if *is_final { "final" } else { "interim" };
            format!("{kind} transcript {text:?}")
        }
        TurnEvent::SpeakingStarted(handle) => format!("speaking #{}", handle.seq()),
        TurnEvent::SpeakingFinished { handle, outcome } => {
            let outcome = match outcome {
                PlaybackOutcome::Completed => "completed".to_string(),
                PlaybackOutcome::Interrupted => "interrupted".to_string(),
                PlaybackOutcome::Failed(failure) => format!("failed: {failure}"),
            };
            format!("finished #{} ({outcome})", handle.seq())
        }
        TurnEvent::Error(error) => format!("error: {}", error.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(json: &str) -> Scenario {
        Scenario::from_json_str(json).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_timeline() {
        let scenario = scenario(
            r#"{
                "steps": [
                    { "action": "press" },
                    { "action": "capture_started" },
                    { "action": "expect", "state": "listening" },
                    { "action": "speak", "text": "Hello there" },
                    { "action": "expect", "state": "suspended", "intent": true, "playing": true },
                    { "action": "playback_finished" },
                    { "action": "wait", "ms": 299 },
                    { "action": "expect", "state": "restart_scheduled" },
                    { "action": "wait", "ms": 1 },
                    { "action": "expect", "state": "listening_pending_start" }
                ]
            }"#,
        );

        let report = run(&scenario, &TurnConfig::default()).await.unwrap();
        assert!(report.passed(), "{:?}", report.failures);
        assert_eq!(report.final_snapshot.turn_state, TurnState::ListeningPendingStart);

        let events: Vec<&str> = report.lines(EntryKind::Event).collect();
        assert!(events.contains(&"speaking #1"));
        assert!(events.contains(&"finished #1 (completed)"));

        let restart = report
            .timeline
            .iter()
            .rfind(|entry| entry.line == "state -> listening_pending_start")
            .unwrap();
        assert_eq!(restart.at_ms, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_expectations_are_reported() {
        let scenario = scenario(
            r#"{
                "steps": [
                    { "action": "press" },
                    { "action": "expect", "state": "listening", "intent": true }
                ]
            }"#,
        );

        let report = run(&scenario, &TurnConfig::default()).await.unwrap();
        assert!(!report.passed());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("step 2: state is listening_pending_start"));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_commands_are_noted_not_fatal() {
        let scenario = scenario(
            r#"{
                "capture_unavailable": true,
                "steps": [
                    { "action": "press" },
                    { "action": "press" },
                    { "action": "speak", "text": "   " },
                    { "action": "expect", "state": "idle", "intent": false }
                ]
            }"#,
        );

        let report = run(&scenario, &TurnConfig::default()).await.unwrap();
        assert!(report.passed(), "{:?}", report.failures);

        let checks: Vec<&str> = report.lines(EntryKind::Check).collect();
        assert!(checks.iter().any(|line| line.contains("not available")));
        assert!(checks.iter().any(|line| line.contains("Nothing to speak")));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_finished_playback_lands_at_audio_end() {
        // 10 ms of scripted audio per character
        let scenario = scenario(
            r#"{
                "auto_finish_playback": true,
                "synthesis_latency_ms": 50,
                "steps": [
                    { "action": "speak", "text": "abcdefghij" },
                    { "action": "wait", "ms": 1000 },
                    { "action": "expect", "state": "idle", "playing": false }
                ]
            }"#,
        );

        let report = run(&scenario, &TurnConfig::default()).await.unwrap();
        assert!(report.passed(), "{:?}", report.failures);

        let finished = report
            .timeline
            .iter()
            .find(|entry| entry.line == "finished #1 (completed)")
            .unwrap();
        assert_eq!(finished.at_ms, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_config_replaces_base() {
        let scenario = scenario(
            r#"{
                "config": { "post_playback_delay_ms": 40 },
                "platform": "ios_webkit",
                "steps": [
                    { "action": "press" },
                    { "action": "capture_started" },
                    { "action": "speak", "text": "ok" },
                    { "action": "playback_finished" },
                    { "action": "wait", "ms": 40 },
                    { "action": "expect", "state": "listening_pending_start" }
                ]
            }"#,
        );

        let base = TurnConfig {
            post_playback_delay_ms: Some(5_000),
            ..TurnConfig::default()
        };
        let report = run(&scenario, &base).await.unwrap();
        assert_eq!(report.policy, PlatformQuirkPolicy::IosWebKit);
        assert!(report.passed(), "{:?}", report.failures);
    }
}
