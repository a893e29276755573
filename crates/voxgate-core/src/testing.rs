//! Scripted collaborators for tests and the command-line simulator.
//!
//! Each probe owns shared state behind a mutex and hands out factories that
//! create engines bound to that state, so a test can drive the engine side
//! (`emit_*`, `finish`) while the coordinator owns the engines. The scripted
//! engines behave like browser engines where it matters: aborting capture
//! reports `aborted` then `end`, and stopping playback fires `ended`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::capture::{CaptureEngine, CaptureEngineFactory, CaptureEventSink, CaptureOptions};
use crate::context::{AudioContext, AudioContextFactory, ContextState};
use crate::error::{CaptureErrorKind, ContextError, PlaybackFailure, SynthesisError};
use crate::playback::{PlaybackEngine, PlaybackEngineFactory, PlaybackEventSink, PlaybackHandle};
use crate::policy::ContextParams;
use crate::service::Collaborators;
use crate::synthesis::{SpeechAudio, SpeechSynthesizer};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Capture ─────────────────────────────────────────────────────

#[derive(Default)]
struct CaptureScript {
    unsupported: bool,
    fail_next_start: Option<CaptureErrorKind>,
    sink: Option<CaptureEventSink>,
    options: Vec<CaptureOptions>,
    starts: usize,
    stops: usize,
    aborts: usize,
}

/// Drives scripted capture engines.
#[derive(Clone, Default)]
pub struct CaptureProbe {
    inner: Arc<Mutex<CaptureScript>>,
}

impl CaptureProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory to hand to the coordinator.
    pub fn factory(&self) -> Box<dyn CaptureEngineFactory> {
        Box::new(self.clone())
    }

    /// Make the factory report that no engine exists.
    pub fn set_supported(&self, supported: bool) {
        lock(&self.inner).unsupported = !supported;
    }

    /// The next `start` call fails with `kind`.
    pub fn fail_next_start(&self, kind: CaptureErrorKind) {
        lock(&self.inner).fail_next_start = Some(kind);
    }

    pub fn emit_started(&self) {
        if let Some(sink) = self.sink() {
            sink.started();
        }
    }

    pub fn emit_result(&self, text: &str, is_final: bool) {
        if let Some(sink) = self.sink() {
            sink.result(text, is_final);
        }
    }

    /// Report a platform error code, e.g. `"no-speech"`.
    pub fn emit_error(&self, code: &str) {
        if let Some(sink) = self.sink() {
            sink.error_code(code);
        }
    }

    pub fn emit_ended(&self) {
        if let Some(sink) = self.sink() {
            sink.ended();
        }
    }

    /// Number of successful engine starts.
    pub fn start_count(&self) -> usize {
        lock(&self.inner).starts
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.inner).stops
    }

    pub fn abort_count(&self) -> usize {
        lock(&self.inner).aborts
    }

    /// Options passed to the most recent start.
    pub fn last_options(&self) -> Option<CaptureOptions> {
        lock(&self.inner).options.last().cloned()
    }

    fn sink(&self) -> Option<CaptureEventSink> {
        lock(&self.inner).sink.clone()
    }
}

impl CaptureEngineFactory for CaptureProbe {
    fn create(&self) -> Option<Box<dyn CaptureEngine>> {
        if lock(&self.inner).unsupported {
            return None;
        }
        Some(Box::new(ScriptedCaptureEngine {
            script: Arc::clone(&self.inner),
            sink: None,
        }))
    }
}

struct ScriptedCaptureEngine {
    script: Arc<Mutex<CaptureScript>>,
    sink: Option<CaptureEventSink>,
}

impl CaptureEngine for ScriptedCaptureEngine {
    fn start(
        &mut self,
        options: &CaptureOptions,
        events: CaptureEventSink,
    ) -> Result<(), CaptureErrorKind> {
        let mut script = lock(&self.script);
        if let Some(kind) = script.fail_next_start.take() {
            return Err(kind);
        }
        script.starts += 1;
        script.options.push(options.clone());
        script.sink = Some(events.clone());
        self.sink = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        lock(&self.script).stops += 1;
    }

    fn abort(&mut self) {
        lock(&self.script).aborts += 1;
        if let Some(sink) = self.sink.take() {
            sink.error(CaptureErrorKind::Aborted);
            sink.ended();
        }
    }
}

// ── Playback ────────────────────────────────────────────────────

#[derive(Default)]
struct PlaybackScript {
    fail_next_create: Option<PlaybackFailure>,
    fail_next_start: Option<String>,
    auto_finish: bool,
    sinks: HashMap<PlaybackHandle, PlaybackEventSink>,
    started: Vec<PlaybackHandle>,
    stops: usize,
}

/// Drives scripted playback engines.
#[derive(Clone, Default)]
pub struct PlaybackProbe {
    inner: Arc<Mutex<PlaybackScript>>,
}

impl PlaybackProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Box<dyn PlaybackEngineFactory> {
        Box::new(self.clone())
    }

    /// Finish every started buffer after its audio duration. Requires a
    /// tokio runtime.
    pub fn set_auto_finish(&self, enabled: bool) {
        lock(&self.inner).auto_finish = enabled;
    }

    /// The next engine creation fails.
    pub fn fail_next_create(&self, failure: PlaybackFailure) {
        lock(&self.inner).fail_next_create = Some(failure);
    }

    /// The next engine start fails with [`PlaybackFailure::Engine`].
    pub fn fail_next_start(&self, detail: &str) {
        lock(&self.inner).fail_next_start = Some(detail.to_string());
    }

    /// Fire `ended` for `handle`.
    pub fn finish(&self, handle: PlaybackHandle) {
        let sink = lock(&self.inner).sinks.get(&handle).cloned();
        if let Some(sink) = sink {
            sink.finished();
        }
    }

    /// Fire `ended` for the most recently started handle.
    pub fn finish_latest(&self) -> Option<PlaybackHandle> {
        let handle = self.latest_handle()?;
        self.finish(handle);
        Some(handle)
    }

    /// Report a mid-playback error for `handle`.
    pub fn fail(&self, handle: PlaybackHandle, detail: &str) {
        let sink = lock(&self.inner).sinks.get(&handle).cloned();
        if let Some(sink) = sink {
            sink.failed(detail);
        }
    }

    pub fn latest_handle(&self) -> Option<PlaybackHandle> {
        lock(&self.inner).started.last().copied()
    }

    /// Handles whose engine started, in order.
    pub fn started_handles(&self) -> Vec<PlaybackHandle> {
        lock(&self.inner).started.clone()
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.inner).stops
    }
}

impl PlaybackEngineFactory for PlaybackProbe {
    fn create(&self, handle: PlaybackHandle) -> Result<Box<dyn PlaybackEngine>, PlaybackFailure> {
        if let Some(failure) = lock(&self.inner).fail_next_create.take() {
            return Err(failure);
        }
        Ok(Box::new(ScriptedPlaybackEngine {
            script: Arc::clone(&self.inner),
            handle,
            sink: None,
        }))
    }
}

struct ScriptedPlaybackEngine {
    script: Arc<Mutex<PlaybackScript>>,
    handle: PlaybackHandle,
    sink: Option<PlaybackEventSink>,
}

impl PlaybackEngine for ScriptedPlaybackEngine {
    fn start(
        &mut self,
        _context: &mut dyn AudioContext,
        audio: SpeechAudio,
        events: PlaybackEventSink,
    ) -> Result<(), PlaybackFailure> {
        let auto_finish = {
            let mut script = lock(&self.script);
            if let Some(detail) = script.fail_next_start.take() {
                return Err(PlaybackFailure::Engine(detail));
            }
            script.started.push(self.handle);
            script.sinks.insert(self.handle, events.clone());
            script.auto_finish
        };

        if auto_finish {
            let sink = events.clone();
            let duration = audio.duration;
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                sink.finished();
            });
        }
        self.sink = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        lock(&self.script).stops += 1;
        if let Some(sink) = self.sink.take() {
            sink.finished();
        }
    }
}

// ── Audio context ───────────────────────────────────────────────

#[derive(Debug)]
struct ContextScript {
    state: ContextState,
    start_suspended: bool,
    refuse_resume: bool,
    fail_create: bool,
    created: usize,
    resumes: usize,
    unlock_samples: usize,
    pre_warms: usize,
}

impl Default for ContextScript {
    fn default() -> Self {
        Self {
            state: ContextState::Suspended,
            start_suspended: false,
            refuse_resume: false,
            fail_create: false,
            created: 0,
            resumes: 0,
            unlock_samples: 0,
            pre_warms: 0,
        }
    }
}

/// Drives a scripted audio context. All contexts a probe creates share
/// one state, like successive `AudioContext` objects on one page.
#[derive(Clone, Default)]
pub struct ContextProbe {
    inner: Arc<Mutex<ContextScript>>,
}

impl ContextProbe {
    /// A context that is created running.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that is created suspended, as mobile browsers do.
    pub fn locked() -> Self {
        let probe = Self::default();
        lock(&probe.inner).start_suspended = true;
        probe
    }

    pub fn factory(&self) -> Box<dyn AudioContextFactory> {
        Box::new(self.clone())
    }

    pub fn fail_create(&self, fail: bool) {
        lock(&self.inner).fail_create = fail;
    }

    /// Reject `resume()` as if no user activation were present.
    pub fn refuse_resume(&self, refuse: bool) {
        lock(&self.inner).refuse_resume = refuse;
    }

    /// Simulate the platform closing the context.
    pub fn close(&self) {
        lock(&self.inner).state = ContextState::Closed;
    }

    pub fn state(&self) -> ContextState {
        lock(&self.inner).state
    }

    pub fn created_count(&self) -> usize {
        lock(&self.inner).created
    }

    pub fn resume_count(&self) -> usize {
        lock(&self.inner).resumes
    }

    pub fn unlock_sample_count(&self) -> usize {
        lock(&self.inner).unlock_samples
    }

    pub fn pre_warm_count(&self) -> usize {
        lock(&self.inner).pre_warms
    }
}

impl AudioContextFactory for ContextProbe {
    fn create(&self, params: ContextParams) -> Result<Box<dyn AudioContext>, ContextError> {
        let mut script = lock(&self.inner);
        if script.fail_create {
            return Err(ContextError::Create("scripted failure".to_string()));
        }
        script.created += 1;
        script.state = if script.start_suspended {
            ContextState::Suspended
        } else {
            ContextState::Running
        };
        Ok(Box::new(ScriptedContext {
            script: Arc::clone(&self.inner),
            sample_rate: params.sample_rate,
        }))
    }
}

struct ScriptedContext {
    script: Arc<Mutex<ContextScript>>,
    sample_rate: u32,
}

impl AudioContext for ScriptedContext {
    fn state(&self) -> ContextState {
        lock(&self.script).state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), ContextError> {
        let mut script = lock(&self.script);
        script.resumes += 1;
        if script.refuse_resume {
            return Err(ContextError::Resume("no user activation".to_string()));
        }
        if script.state == ContextState::Suspended {
            script.state = ContextState::Running;
        }
        Ok(())
    }

    fn play_unlock_sample(&mut self) -> Result<(), ContextError> {
        lock(&self.script).unlock_samples += 1;
        Ok(())
    }

    fn pulse_gain_graph(&mut self) -> Result<(), ContextError> {
        lock(&self.script).pre_warms += 1;
        Ok(())
    }
}

// ── Synthesis ───────────────────────────────────────────────────

/// Sample rate of scripted speech.
pub const SCRIPTED_SAMPLE_RATE: u32 = 16_000;

#[derive(Default)]
struct SynthesisScript {
    default_latency: Duration,
    latencies: HashMap<String, Duration>,
    failures: HashMap<String, SynthesisError>,
    calls: Vec<String>,
}

/// Synthesizer that produces silence sized to the text.
///
/// Each character yields 10 ms of audio. Latency and failures can be
/// scripted per text.
#[derive(Clone, Default)]
pub struct ScriptedSynthesizer {
    inner: Arc<Mutex<SynthesisScript>>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latency applied to every request without its own.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.inner).default_latency = latency;
    }

    pub fn latency_for(&self, text: &str, latency: Duration) {
        lock(&self.inner).latencies.insert(text.to_string(), latency);
    }

    pub fn fail_for(&self, text: &str, error: SynthesisError) {
        lock(&self.inner).failures.insert(text.to_string(), error);
    }

    /// Texts synthesized so far, in request order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.inner).calls.clone()
    }

    /// Audio length produced for `text`.
    pub fn audio_duration(text: &str) -> Duration {
        Duration::from_millis(10 * text.chars().count() as u64)
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, SynthesisError> {
        let (latency, failure) = {
            let mut script = lock(&self.inner);
            script.calls.push(text.to_string());
            let latency = script
                .latencies
                .get(text)
                .copied()
                .unwrap_or(script.default_latency);
            (latency, script.failures.get(text).cloned())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let samples_per_char = SCRIPTED_SAMPLE_RATE as usize / 100;
        let samples = vec![0.0; samples_per_char * text.chars().count()];
        Ok(SpeechAudio::from_samples(samples, SCRIPTED_SAMPLE_RATE))
    }
}

// ── Bundle ──────────────────────────────────────────────────────

/// All scripted collaborators for one coordinator.
#[derive(Clone, Default)]
pub struct ScriptedPlatform {
    pub capture: CaptureProbe,
    pub playback: PlaybackProbe,
    pub context: ContextProbe,
    pub synthesizer: ScriptedSynthesizer,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborators wired to these probes.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            capture: self.capture.factory(),
            playback: self.playback.factory(),
            context: self.context.factory(),
            synthesizer: Arc::new(self.synthesizer.clone()),
        }
    }
}
