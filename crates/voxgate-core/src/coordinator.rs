//! Turn coordinator: the state machine that keeps capture and playback
//! mutually exclusive.
//!
//! The coordinator separates what the user wants (`capture_intent`) from
//! what is mechanically happening ([`TurnState`]). Whenever intent is set and
//! no playback is pending, it is either listening, starting, or has a restart
//! armed; when playback starts, capture is aborted in the same reaction
//! before the engine is told to play.
//!
//! All reactions are synchronous. Asynchronous work (restart timers, the
//! capture-start watchdog, synthesis) runs on spawned tasks that report back
//! as [`CoordinatorInput`] messages, so the coordinator itself never awaits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::capture::{
    CaptureAttemptId, CaptureEvent, CaptureOptions, CaptureSession, CaptureSignal,
};
use crate::config::{OverlapPolicy, TurnConfig};
use crate::context::{AudioContextLifecycle, GestureKind};
use crate::error::{
    CaptureErrorKind, CaptureStartError, PlaybackFailure, SynthesisError, TurnError,
};
use crate::playback::{
    PlayStart, PlaybackHandle, PlaybackOutcome, PlaybackSession, PlaybackSignal, PlaybackTicket,
    SpeakRequest,
};
use crate::policy::PlatformQuirkPolicy;
use crate::restart::{RestartGate, RestartToken};
use crate::service::Collaborators;
use crate::state::{SurfacedError, SurfacedErrorKind, TurnEvent, TurnSnapshot, TurnState};
use crate::synthesis::{SpeechAudio, SpeechSynthesizer};

// ── Inputs ─────────────────────────────────────────────────────────

/// Asynchronous inputs delivered back to the coordinator.
#[derive(Debug)]
pub enum CoordinatorInput {
    /// Raw signal from a capture engine.
    Capture(CaptureSignal),

    /// Raw signal from a playback engine.
    Playback(PlaybackSignal),

    /// A synthesis job finished.
    SynthesisReady {
        handle: PlaybackHandle,
        result: Result<SpeechAudio, SynthesisError>,
    },

    /// A restart timer fired.
    RestartDue(RestartToken),

    /// The start watchdog for an attempt fired.
    StartTimeout(CaptureAttemptId),
}

/// A request waiting for the previous handle (queue overlap policy).
struct QueuedSpeech {
    ticket: PlaybackTicket,
    text: String,
}

// ── Coordinator ────────────────────────────────────────────────────

/// The central turn-taking state machine.
pub struct TurnCoordinator {
    config: TurnConfig,
    policy: PlatformQuirkPolicy,
    capture_options: CaptureOptions,
    restart_delay: Duration,
    post_playback_delay: Duration,

    capture: CaptureSession,
    playback: PlaybackSession,
    context: AudioContextLifecycle,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    restart: RestartGate,
    queue: VecDeque<QueuedSpeech>,

    state: TurnState,
    intent: bool,
    capture_supported: bool,
    consecutive_failures: u32,
    last_error: Option<SurfacedError>,

    inputs: mpsc::UnboundedSender<CoordinatorInput>,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
    snapshot_tx: watch::Sender<TurnSnapshot>,
}

impl TurnCoordinator {
    /// Create a coordinator in `Idle` with no capture intent.
    ///
    /// `inputs` is the sender half of the channel the owner must drain into
    /// [`handle_input`](Self::handle_input). The audio unlock listeners are
    /// armed immediately.
    pub fn new(
        config: TurnConfig,
        policy: PlatformQuirkPolicy,
        collaborators: Collaborators,
        inputs: mpsc::UnboundedSender<CoordinatorInput>,
    ) -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut context = AudioContextLifecycle::new(collaborators.context, policy);
        context.unlock();
        let (snapshot_tx, _) = watch::channel(TurnSnapshot::initial(context.state()));

        tracing::info!(
            %policy,
            restart_delay_ms = config.restart_delay(policy).as_millis(),
            post_playback_delay_ms = config.post_playback_delay(policy).as_millis(),
            overlap = ?config.overlap,
            "Turn coordinator created"
        );

        let coordinator = Self {
            capture_options: config.capture_options(policy),
            restart_delay: config.restart_delay(policy),
            post_playback_delay: config.post_playback_delay(policy),
            capture: CaptureSession::new(collaborators.capture, inputs.clone()),
            playback: PlaybackSession::new(collaborators.playback, inputs.clone()),
            context,
            synthesizer: collaborators.synthesizer,
            restart: RestartGate::new(),
            queue: VecDeque::new(),
            state: TurnState::Idle,
            intent: false,
            capture_supported: true,
            consecutive_failures: 0,
            last_error: None,
            inputs,
            event_tx,
            snapshot_tx,
            config,
            policy,
        };

        (coordinator, event_rx)
    }

    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    #[must_use]
    pub const fn capture_intent(&self) -> bool {
        self.intent
    }

    #[must_use]
    pub const fn policy(&self) -> PlatformQuirkPolicy {
        self.policy
    }

    #[must_use]
    pub const fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TurnSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receive a snapshot after every reaction that changed it.
    pub fn subscribe(&self) -> watch::Receiver<TurnSnapshot> {
        self.snapshot_tx.subscribe()
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Toggle capture intent.
    ///
    /// Sets intent and starts capture (or waits in `Suspended` while playback
    /// is pending). With intent already set this is a release.
    pub fn press_microphone(&mut self) -> Result<(), TurnError> {
        if !self.capture_supported {
            return Err(TurnError::CaptureUnavailable);
        }
        if self.intent {
            self.release_microphone();
            return Ok(());
        }

        tracing::info!(state = %self.state, "Capture intent set");
        self.intent = true;
        self.consecutive_failures = 0;
        self.last_error = None;

        if self.playback.has_pending() {
            self.set_state(TurnState::Suspended);
        } else {
            self.begin_capture();
        }
        self.publish();
        Ok(())
    }

    /// Clear capture intent. Idempotent.
    ///
    /// A confirmed capture is stopped gracefully so a trailing final result
    /// is still delivered; a pending start is aborted.
    pub fn release_microphone(&mut self) {
        if self.intent {
            tracing::info!(state = %self.state, "Capture intent cleared");
        }
        self.intent = false;
        self.restart.invalidate();

        match self.state {
            TurnState::Listening => self.capture.stop(),
            TurnState::ListeningPendingStart => {
                self.capture.abort();
            }
            TurnState::Idle | TurnState::Suspended | TurnState::RestartScheduled => {}
        }
        self.set_state(TurnState::Idle);
        self.publish();
    }

    /// Synthesize `text` and play it.
    ///
    /// Under [`OverlapPolicy::Interrupt`] an earlier request still in flight
    /// resolves `Interrupted`; under [`OverlapPolicy::Queue`] this request
    /// waits for it.
    pub fn request_speak(&mut self, text: &str) -> Result<SpeakRequest, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::NothingToSpeak);
        }

        let (ticket, request) = self.playback.issue();
        if self.config.overlap == OverlapPolicy::Queue && self.playback.has_pending() {
            tracing::debug!(
                handle = %ticket.handle(),
                queued = self.queue.len() + 1,
                "Speech request queued"
            );
            self.queue.push_back(QueuedSpeech {
                ticket,
                text: text.to_string(),
            });
        } else {
            self.dispatch_speech(ticket, text.to_string());
        }
        self.publish();
        Ok(request)
    }

    /// Interrupt the current playback. No-op when nothing is pending.
    pub fn stop_speaking(&mut self) {
        let interrupted = self.playback.interrupt_current();
        let drained: Vec<QueuedSpeech> = self.queue.drain(..).collect();
        if interrupted.is_none() && drained.is_empty() {
            tracing::debug!("Stop speaking with no playback pending");
            return;
        }

        if let Some((handle, outcome)) = interrupted {
            self.emit(TurnEvent::SpeakingFinished { handle, outcome });
        }
        for queued in drained {
            let handle = queued.ticket.handle();
            queued.ticket.resolve(PlaybackOutcome::Interrupted);
            self.emit(TurnEvent::SpeakingFinished {
                handle,
                outcome: PlaybackOutcome::Interrupted,
            });
        }

        self.after_playback_terminal();
        self.publish();
    }

    /// Forward a user gesture to the audio context lifecycle.
    pub fn gesture(&mut self, kind: GestureKind) -> bool {
        let unlocked = self.context.on_gesture(kind);
        self.publish();
        unlocked
    }

    /// Forward a page visibility change to the audio context lifecycle.
    pub fn visibility_changed(&mut self, visible: bool) -> bool {
        let resumed = self.context.on_visibility_change(visible);
        self.publish();
        resumed
    }

    /// Release everything before the coordinator is dropped.
    pub fn shutdown(&mut self) {
        self.stop_speaking();
        self.release_microphone();
        self.capture.abort();
        tracing::info!("Turn coordinator shut down");
    }

    // ── Inputs ─────────────────────────────────────────────────────

    /// React to one asynchronous input.
    pub fn handle_input(&mut self, input: CoordinatorInput) {
        match input {
            CoordinatorInput::Capture(signal) => {
                if let Some(event) = self.capture.accept(signal) {
                    self.on_capture_event(event);
                }
            }
            CoordinatorInput::Playback(signal) => {
                if let Some((handle, outcome)) = self.playback.accept(signal) {
                    self.on_playback_terminal(handle, outcome);
                }
            }
            CoordinatorInput::SynthesisReady { handle, result } => {
                self.on_synthesis_ready(handle, result);
            }
            CoordinatorInput::RestartDue(token) => self.on_restart_due(token),
            CoordinatorInput::StartTimeout(attempt) => self.on_start_timeout(attempt),
        }
        self.publish();
    }

    fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Started => self.on_capture_confirmed(),
            CaptureEvent::Interim(text) => {
                self.on_capture_confirmed();
                self.emit(TurnEvent::Transcript {
                    text,
                    is_final: false,
                });
            }
            CaptureEvent::Final(text) => {
                self.on_capture_confirmed();
                tracing::debug!(chars = text.len(), "Final transcript");
                self.emit(TurnEvent::Transcript {
                    text,
                    is_final: true,
                });
                if self.config.stop_capture_on_final && self.intent {
                    self.capture.stop();
                }
            }
            CaptureEvent::Ended => {
                tracing::debug!(state = %self.state, "Capture attempt ended");
                self.after_capture_closed();
            }
            CaptureEvent::Error(kind) => self.on_capture_failure(kind),
        }
    }

    fn on_capture_confirmed(&mut self) {
        self.consecutive_failures = 0;
        if self.state == TurnState::ListeningPendingStart {
            self.set_state(TurnState::Listening);
        }
    }

    fn on_capture_failure(&mut self, kind: CaptureErrorKind) {
        if kind.is_terminal() {
            tracing::error!(%kind, "Terminal capture error");
            self.surface_terminal(kind.to_string());
            return;
        }

        if kind.counts_as_failure() {
            self.consecutive_failures += 1;
            if self.consecutive_failures > self.config.max_consecutive_failures {
                tracing::error!(
                    %kind,
                    failures = self.consecutive_failures,
                    "Capture keeps failing, giving up"
                );
                self.surface_terminal(format!("Capture keeps failing: {kind}"));
                return;
            }
            tracing::warn!(
                %kind,
                failures = self.consecutive_failures,
                "Recoverable capture failure"
            );
        } else {
            tracing::debug!(%kind, "Capture attempt closed");
        }
        self.after_capture_closed();
    }

    /// The current attempt is over; decide what capture does next.
    fn after_capture_closed(&mut self) {
        if !self.intent {
            self.set_state(TurnState::Idle);
        } else if self.playback.has_pending() {
            self.set_state(TurnState::Suspended);
        } else {
            self.schedule_restart(self.restart_delay);
        }
    }

    fn on_synthesis_ready(
        &mut self,
        handle: PlaybackHandle,
        result: Result<SpeechAudio, SynthesisError>,
    ) {
        let audio = result.and_then(|audio| {
            if audio.is_empty() {
                Err(SynthesisError::EmptyAudio)
            } else {
                Ok(audio)
            }
        });

        match audio {
            Ok(audio) => self.start_playback(handle, audio),
            Err(e) => {
                let failure = PlaybackFailure::Synthesis(e.to_string());
                if self.playback.fail(handle, failure.clone()) {
                    self.on_playback_terminal(handle, PlaybackOutcome::Failed(failure));
                } else {
                    tracing::debug!(
                        %handle,
                        error = %e,
                        "Dropping synthesis error for stale handle"
                    );
                }
            }
        }
    }

    fn start_playback(&mut self, handle: PlaybackHandle, audio: SpeechAudio) {
        let capture = &mut self.capture;
        let restart = &mut self.restart;
        let mut seized = false;
        let start = self.playback.play(handle, audio, &mut self.context, |handle| {
            seized = true;
            let aborted = capture.abort();
            let cancelled = restart.invalidate();
            tracing::debug!(%handle, aborted, cancelled, "Playback seized the audio device");
        });

        match start {
            PlayStart::Started => {
                self.emit(TurnEvent::SpeakingStarted(handle));
                if self.intent {
                    self.set_state(TurnState::Suspended);
                }
            }
            PlayStart::Stale => {}
            PlayStart::Failed(failure) => {
                // Capture was already released for this handle; hand it back
                // through the post-playback restart.
                if seized && self.intent {
                    self.set_state(TurnState::Suspended);
                }
                self.on_playback_terminal(handle, PlaybackOutcome::Failed(failure));
            }
        }
    }

    fn on_playback_terminal(&mut self, handle: PlaybackHandle, outcome: PlaybackOutcome) {
        tracing::debug!(%handle, ?outcome, "Playback reached terminal outcome");
        if let PlaybackOutcome::Failed(failure) = &outcome {
            self.surface(SurfacedError::new(
                SurfacedErrorKind::PlaybackFailure,
                failure.to_string(),
            ));
        }
        self.emit(TurnEvent::SpeakingFinished { handle, outcome });
        self.after_playback_terminal();
    }

    /// The device was released by playback; hand it to the next request or
    /// back to capture.
    fn after_playback_terminal(&mut self) {
        if self.playback.has_pending() {
            return;
        }
        if let Some(next) = self.queue.pop_front() {
            self.dispatch_speech(next.ticket, next.text);
            return;
        }
        if self.intent && self.state == TurnState::Suspended {
            self.schedule_restart(self.post_playback_delay);
        }
    }

    fn on_restart_due(&mut self, token: RestartToken) {
        if !self.restart.redeem(token) {
            tracing::trace!(?token, "Dropping invalidated restart");
            return;
        }
        if !self.intent {
            self.set_state(TurnState::Idle);
        } else if self.playback.has_pending() {
            self.set_state(TurnState::Suspended);
        } else {
            self.begin_capture();
        }
    }

    fn on_start_timeout(&mut self, attempt: CaptureAttemptId) {
        if self.state != TurnState::ListeningPendingStart
            || self.capture.current_attempt() != Some(attempt)
        {
            return;
        }
        tracing::warn!(
            attempt = attempt.0,
            timeout_ms = self.config.capture_start_timeout().as_millis(),
            "Capture engine never confirmed start"
        );
        self.capture.abort();
        self.on_capture_failure(CaptureErrorKind::DeviceUnavailable);
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn begin_capture(&mut self) {
        match self.capture.start(&self.capture_options) {
            Ok(attempt) => {
                self.set_state(TurnState::ListeningPendingStart);
                self.arm_start_watchdog(attempt);
            }
            Err(CaptureStartError::UnsupportedPlatform) => {
                self.capture_supported = false;
                self.surface_terminal(CaptureStartError::UnsupportedPlatform.to_string());
            }
            Err(CaptureStartError::Engine(kind)) => {
                tracing::warn!(%kind, "Capture engine refused to start");
                self.on_capture_failure(kind);
            }
        }
    }

    fn schedule_restart(&mut self, delay: Duration) {
        let token = self.restart.arm();
        self.set_state(TurnState::RestartScheduled);
        tracing::debug!(?token, delay_ms = delay.as_millis(), "Capture restart scheduled");

        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(CoordinatorInput::RestartDue(token));
        });
    }

    fn arm_start_watchdog(&self, attempt: CaptureAttemptId) {
        let timeout = self.config.capture_start_timeout();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = inputs.send(CoordinatorInput::StartTimeout(attempt));
        });
    }

    fn dispatch_speech(&mut self, ticket: PlaybackTicket, text: String) {
        let handle = ticket.handle();
        if let Some((displaced, outcome)) = self.playback.arm(ticket) {
            tracing::debug!(%displaced, superseded_by = %handle, "Speech request superseded");
            self.emit(TurnEvent::SpeakingFinished {
                handle: displaced,
                outcome,
            });
        }

        let synthesizer = Arc::clone(&self.synthesizer);
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = synthesizer.synthesize(&text).await;
            let _ = inputs.send(CoordinatorInput::SynthesisReady { handle, result });
        });
    }

    /// Clear intent and surface a terminal capture error once.
    fn surface_terminal(&mut self, message: String) {
        self.intent = false;
        self.restart.invalidate();
        self.capture.abort();
        self.set_state(TurnState::Idle);
        self.surface(SurfacedError::new(SurfacedErrorKind::TerminalCapture, message));
    }

    fn surface(&mut self, error: SurfacedError) {
        self.emit(TurnEvent::Error(error.clone()));
        self.last_error = Some(error);
    }

    fn set_state(&mut self, new_state: TurnState) {
        if self.state != new_state {
            tracing::debug!(old = %self.state, new = %new_state, "Turn state transition");
            self.state = new_state;
            self.emit(TurnEvent::StateChanged(new_state));
        }
    }

    fn emit(&self, event: TurnEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Turn event receiver dropped");
        }
    }

    /// Push the coalesced snapshot to subscribers if anything changed.
    fn publish(&self) {
        let snapshot = TurnSnapshot {
            turn_state: self.state,
            capture_intent: self.intent,
            last_error: self.last_error.clone(),
            capture_supported: self.capture_supported,
            playback_active: self.playback.is_playing(),
            context_state: self.context.state(),
        };
        debug_assert!(
            !(snapshot.turn_state == TurnState::Listening && snapshot.playback_active),
            "capture and playback overlap"
        );
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextState;
    use crate::testing::{ContextProbe, ScriptedPlatform};

    struct Harness {
        coordinator: TurnCoordinator,
        inputs: mpsc::UnboundedReceiver<CoordinatorInput>,
        events: mpsc::UnboundedReceiver<TurnEvent>,
        platform: ScriptedPlatform,
    }

    impl Harness {
        fn new(config: TurnConfig) -> Self {
            let platform = ScriptedPlatform::new();
            let (tx, inputs) = mpsc::unbounded_channel();
            let (coordinator, events) = TurnCoordinator::new(
                config,
                PlatformQuirkPolicy::Default,
                platform.collaborators(),
                tx,
            );
            Self {
                coordinator,
                inputs,
                events,
                platform,
            }
        }

        /// Let spawned tasks run and feed everything they sent back in.
        async fn settle(&mut self) {
            for _ in 0..8 {
                tokio::task::yield_now().await;
                while let Ok(input) = self.inputs.try_recv() {
                    self.coordinator.handle_input(input);
                }
            }
        }

        async fn advance(&mut self, by: Duration) {
            tokio::time::advance(by).await;
            self.settle().await;
        }

        fn drain_events(&mut self) -> Vec<TurnEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        async fn listening(&mut self) {
            self.coordinator.press_microphone().unwrap();
            self.platform.capture.emit_started();
            self.settle().await;
            assert_eq!(self.coordinator.state(), TurnState::Listening);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn press_starts_capture_and_started_confirms_it() {
        let mut h = Harness::new(TurnConfig::default());
        tokio_test::assert_ok!(h.coordinator.press_microphone());
        assert_eq!(h.coordinator.state(), TurnState::ListeningPendingStart);
        assert!(h.coordinator.capture_intent());
        assert_eq!(h.platform.capture.start_count(), 1);

        h.platform.capture.emit_started();
        h.settle().await;
        assert_eq!(h.coordinator.state(), TurnState::Listening);
        assert_eq!(
            h.drain_events(),
            vec![
                TurnEvent::StateChanged(TurnState::ListeningPendingStart),
                TurnEvent::StateChanged(TurnState::Listening),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_press_releases_gracefully() {
        let mut h = Harness::new(TurnConfig::default());
        h.listening().await;

        h.coordinator.press_microphone().unwrap();
        assert_eq!(h.coordinator.state(), TurnState::Idle);
        assert!(!h.coordinator.capture_intent());
        assert_eq!(h.platform.capture.stop_count(), 1);
        assert_eq!(h.platform.capture.abort_count(), 0);

        // A trailing final result after the graceful stop is still delivered.
        h.drain_events();
        h.platform.capture.emit_result("last words", true);
        h.platform.capture.emit_ended();
        h.settle().await;
        assert_eq!(
            h.drain_events(),
            vec![TurnEvent::Transcript {
                text: "last words".into(),
                is_final: true
            }]
        );
        assert_eq!(h.coordinator.state(), TurnState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn release_during_pending_start_aborts() {
        let mut h = Harness::new(TurnConfig::default());
        h.coordinator.press_microphone().unwrap();
        h.coordinator.release_microphone();
        h.coordinator.release_microphone();
        h.settle().await;

        assert_eq!(h.platform.capture.abort_count(), 1);
        assert_eq!(h.coordinator.state(), TurnState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn no_speech_restarts_after_debounce() {
        let mut h = Harness::new(TurnConfig::default());
        h.listening().await;

        h.platform.capture.emit_error("no-speech");
        h.platform.capture.emit_ended();
        h.settle().await;
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);
        assert!(h.coordinator.snapshot().last_error.is_none());

        h.advance(PlatformQuirkPolicy::Default.restart_delay()).await;
        assert_eq!(h.coordinator.state(), TurnState::ListeningPendingStart);
        assert_eq!(h.platform.capture.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_speaking_without_playback_is_a_noop() {
        let mut h = Harness::new(TurnConfig::default());
        h.listening().await;
        h.drain_events();

        h.coordinator.stop_speaking();
        assert_eq!(h.coordinator.state(), TurnState::Listening);
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_capture_is_reported_once() {
        let mut h = Harness::new(TurnConfig::default());
        h.platform.capture.set_supported(false);

        h.coordinator.press_microphone().unwrap();
        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.turn_state, TurnState::Idle);
        assert!(!snapshot.capture_intent);
        assert!(!snapshot.capture_supported);
        assert_eq!(
            snapshot.last_error.map(|e| e.kind),
            Some(SurfacedErrorKind::TerminalCapture)
        );

        assert_eq!(
            h.coordinator.press_microphone(),
            Err(TurnError::CaptureUnavailable)
        );
        let errors = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, TurnEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_engine_is_abandoned_by_watchdog() {
        let mut h = Harness::new(TurnConfig::default());
        h.coordinator.press_microphone().unwrap();
        h.settle().await;

        h.advance(h.coordinator.config().capture_start_timeout()).await;
        assert_eq!(h.platform.capture.abort_count(), 1);
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);

        h.advance(PlatformQuirkPolicy::Default.restart_delay()).await;
        assert_eq!(h.platform.capture.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_exhaust_the_budget() {
        let config = TurnConfig {
            max_consecutive_failures: 2,
            ..TurnConfig::default()
        };
        let mut h = Harness::new(config);
        h.coordinator.press_microphone().unwrap();

        for _ in 0..2 {
            h.platform.capture.emit_error("network");
            h.settle().await;
            assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);
            h.advance(PlatformQuirkPolicy::Default.restart_delay()).await;
        }

        h.platform.capture.emit_error("audio-capture");
        h.settle().await;
        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.turn_state, TurnState::Idle);
        assert!(!snapshot.capture_intent);
        assert!(snapshot.last_error.is_some_and(|e| e.message.contains("keeps failing")));
    }

    #[tokio::test(start_paused = true)]
    async fn no_speech_does_not_count_against_the_budget() {
        let config = TurnConfig {
            max_consecutive_failures: 1,
            ..TurnConfig::default()
        };
        let mut h = Harness::new(config);
        h.coordinator.press_microphone().unwrap();

        for _ in 0..4 {
            h.platform.capture.emit_error("no-speech");
            h.settle().await;
            h.advance(PlatformQuirkPolicy::Default.restart_delay()).await;
        }
        assert!(h.coordinator.capture_intent());
        assert_eq!(h.coordinator.state(), TurnState::ListeningPendingStart);
    }

    #[tokio::test(start_paused = true)]
    async fn final_result_stops_capture_when_configured() {
        let config = TurnConfig {
            stop_capture_on_final: true,
            ..TurnConfig::default()
        };
        let mut h = Harness::new(config);
        h.listening().await;

        h.platform.capture.emit_result("hello", true);
        h.settle().await;
        assert_eq!(h.platform.capture.stop_count(), 1);
        assert!(h.coordinator.capture_intent());

        h.platform.capture.emit_ended();
        h.settle().await;
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn press_while_speaking_waits_suspended() {
        let mut h = Harness::new(TurnConfig::default());
        let request = h.coordinator.request_speak("good morning").unwrap();
        h.settle().await;
        assert!(h.coordinator.snapshot().playback_active);

        h.coordinator.press_microphone().unwrap();
        assert_eq!(h.coordinator.state(), TurnState::Suspended);
        assert_eq!(h.platform.capture.start_count(), 0);

        h.platform.playback.finish(request.handle());
        h.settle().await;
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);
        h.advance(PlatformQuirkPolicy::Default.post_playback_delay()).await;
        assert_eq!(h.coordinator.state(), TurnState::ListeningPendingStart);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_text_is_rejected() {
        let mut h = Harness::new(TurnConfig::default());
        assert_eq!(
            h.coordinator.request_speak("   ").map(|r| r.handle()),
            Err(TurnError::NothingToSpeak)
        );
        assert!(h.platform.synthesizer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn synthesis_failure_is_surfaced_and_releases_device() {
        let mut h = Harness::new(TurnConfig::default());
        h.platform
            .synthesizer
            .fail_for("broken", SynthesisError::Provider("503".into()));
        h.listening().await;

        let request = h.coordinator.request_speak("broken").unwrap();
        h.settle().await;
        assert!(matches!(
            request.outcome().await,
            Ok(PlaybackOutcome::Failed(PlaybackFailure::Synthesis(_)))
        ));
        let snapshot = h.coordinator.snapshot();
        assert_eq!(
            snapshot.last_error.map(|e| e.kind),
            Some(SurfacedErrorKind::PlaybackFailure)
        );
        // Playback never started, so capture was never interrupted.
        assert_eq!(snapshot.turn_state, TurnState::Listening);
        assert_eq!(h.platform.capture.abort_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_policy_plays_back_to_back() {
        let config = TurnConfig {
            overlap: OverlapPolicy::Queue,
            ..TurnConfig::default()
        };
        let mut h = Harness::new(config);
        let first = h.coordinator.request_speak("first").unwrap();
        let second = h.coordinator.request_speak("second").unwrap();
        h.settle().await;
        assert_eq!(h.platform.synthesizer.calls(), vec!["first".to_string()]);

        h.platform.playback.finish(first.handle());
        h.settle().await;
        assert_eq!(
            h.platform.playback.started_handles(),
            vec![first.handle(), second.handle()]
        );
        assert_eq!(first.outcome().await, Ok(PlaybackOutcome::Completed));

        h.platform.playback.finish(second.handle());
        h.settle().await;
        assert_eq!(second.outcome().await, Ok(PlaybackOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_speaking_drains_the_queue() {
        let config = TurnConfig {
            overlap: OverlapPolicy::Queue,
            ..TurnConfig::default()
        };
        let mut h = Harness::new(config);
        let first = h.coordinator.request_speak("first").unwrap();
        let second = h.coordinator.request_speak("second").unwrap();
        h.settle().await;

        h.coordinator.stop_speaking();
        h.settle().await;
        assert_eq!(first.outcome().await, Ok(PlaybackOutcome::Interrupted));
        assert_eq!(second.outcome().await, Ok(PlaybackOutcome::Interrupted));
        assert_eq!(h.platform.synthesizer.calls().len(), 1);
        assert!(!h.coordinator.snapshot().playback_active);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_synthesis_of_superseded_request_is_dropped() {
        let mut h = Harness::new(TurnConfig::default());
        h.platform
            .synthesizer
            .latency_for("slow", Duration::from_millis(500));

        let slow = h.coordinator.request_speak("slow").unwrap();
        let fast = h.coordinator.request_speak("fast").unwrap();
        h.settle().await;
        assert_eq!(slow.outcome().await, Ok(PlaybackOutcome::Interrupted));

        h.advance(Duration::from_millis(500)).await;
        assert_eq!(h.platform.playback.started_handles(), vec![fast.handle()]);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_refusing_to_start_hands_capture_back() {
        let mut h = Harness::new(TurnConfig::default());
        h.listening().await;

        h.platform.playback.fail_next_start("device busy");
        let request = h.coordinator.request_speak("hello").unwrap();
        h.settle().await;
        assert!(matches!(
            request.outcome().await,
            Ok(PlaybackOutcome::Failed(PlaybackFailure::Engine(_)))
        ));
        assert_eq!(h.platform.capture.abort_count(), 1);
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);
        assert_eq!(
            h.coordinator.snapshot().last_error.map(|e| e.kind),
            Some(SurfacedErrorKind::PlaybackFailure)
        );

        h.advance(PlatformQuirkPolicy::Default.post_playback_delay()).await;
        assert_eq!(h.coordinator.state(), TurnState::ListeningPendingStart);
        assert_eq!(h.platform.capture.start_count(), 2);
        assert!(h.coordinator.capture_intent());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_refusing_to_start_rearms_a_cancelled_restart() {
        let mut h = Harness::new(TurnConfig::default());
        h.listening().await;
        h.platform.capture.emit_error("no-speech");
        h.settle().await;
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);

        h.platform.playback.fail_next_start("device busy");
        h.coordinator.request_speak("hello").unwrap();
        h.settle().await;
        assert_eq!(h.coordinator.state(), TurnState::RestartScheduled);

        h.advance(PlatformQuirkPolicy::Default.post_playback_delay()).await;
        assert_eq!(h.coordinator.state(), TurnState::ListeningPendingStart);
        assert_eq!(h.platform.capture.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ios_capture_is_single_utterance() {
        let platform = ScriptedPlatform::new();
        let (tx, _inputs) = mpsc::unbounded_channel();
        let (mut coordinator, _events) = TurnCoordinator::new(
            TurnConfig::default(),
            PlatformQuirkPolicy::IosWebKit,
            platform.collaborators(),
            tx,
        );

        coordinator.press_microphone().unwrap();
        let options = platform.capture.last_options().unwrap();
        assert!(!options.continuous);
        assert_eq!(options.locale, TurnConfig::default().capture.locale);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_context_is_replaced_on_next_playback() {
        let mut h = Harness::new(TurnConfig::default());
        let first = h.coordinator.request_speak("one").unwrap();
        h.settle().await;
        assert_eq!(h.platform.context.created_count(), 1);
        h.platform.playback.finish(first.handle());
        h.settle().await;

        // A running context is reused.
        let second = h.coordinator.request_speak("two").unwrap();
        h.settle().await;
        assert_eq!(h.platform.context.created_count(), 1);
        h.platform.playback.finish(second.handle());
        h.settle().await;

        h.platform.context.close();
        let third = h.coordinator.request_speak("three").unwrap();
        h.settle().await;
        assert_eq!(h.platform.context.created_count(), 2);
        assert_eq!(h.platform.context.state(), ContextState::Running);
        assert_eq!(h.platform.playback.latest_handle(), Some(third.handle()));
        assert_eq!(h.platform.context.resume_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gestures_unlock_a_locked_context() {
        let platform = ScriptedPlatform {
            context: ContextProbe::locked(),
            ..ScriptedPlatform::new()
        };
        let (tx, _inputs) = mpsc::unbounded_channel();
        let (mut coordinator, _events) = TurnCoordinator::new(
            TurnConfig::default(),
            PlatformQuirkPolicy::IosWebKit,
            platform.collaborators(),
            tx,
        );

        assert!(!coordinator.gesture(GestureKind::Scroll));
        assert!(coordinator.gesture(GestureKind::TouchEnd));
        assert_eq!(platform.context.unlock_sample_count(), 1);
        assert_eq!(platform.context.pre_warm_count(), 1);
        assert_eq!(coordinator.snapshot().context_state, ContextState::Running);
    }
}
