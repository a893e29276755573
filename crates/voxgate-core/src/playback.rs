//! Playback session: one synthesized utterance at a time through the
//! shared audio context.
//!
//! Every request is identified by a [`PlaybackHandle`] with a monotonically
//! increasing sequence number. The session tracks at most one in-flight
//! handle; anything the engine reports for another handle is stale and is
//! dropped. Each handle resolves exactly once: the outcome slot is a
//! [`PlaybackTicket`] that is consumed when resolved.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::context::{AudioContext, AudioContextLifecycle};
use crate::coordinator::CoordinatorInput;
use crate::error::{PlaybackFailure, TurnError};
use crate::synthesis::SpeechAudio;

/// Identifies one synthesis + playback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlaybackHandle(u64);

impl PlaybackHandle {
    /// Sequence number; later requests have larger numbers.
    pub const fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Terminal outcome of a playback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "failure", rename_all = "snake_case")]
pub enum PlaybackOutcome {
    /// The buffer played to the end.
    Completed,
    /// Stopped early by the user or superseded by a newer request.
    Interrupted,
    /// Synthesis or playback failed.
    Failed(PlaybackFailure),
}

/// Raw completion signal from a playback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSignalKind {
    Finished,
    Failed(String),
}

/// A raw engine signal tagged with its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSignal {
    pub handle: PlaybackHandle,
    pub kind: PlaybackSignalKind,
}

/// Handle given to a playback engine for reporting completion.
#[derive(Debug, Clone)]
pub struct PlaybackEventSink {
    handle: PlaybackHandle,
    tx: mpsc::UnboundedSender<CoordinatorInput>,
}

impl PlaybackEventSink {
    pub(crate) const fn new(
        handle: PlaybackHandle,
        tx: mpsc::UnboundedSender<CoordinatorInput>,
    ) -> Self {
        Self { handle, tx }
    }

    /// The handle this sink reports for.
    pub const fn handle(&self) -> PlaybackHandle {
        self.handle
    }

    /// The buffer drained naturally.
    pub fn finished(&self) {
        self.send(PlaybackSignalKind::Finished);
    }

    /// The engine failed mid-playback.
    pub fn failed(&self, detail: impl Into<String>) {
        self.send(PlaybackSignalKind::Failed(detail.into()));
    }

    fn send(&self, kind: PlaybackSignalKind) {
        let signal = PlaybackSignal {
            handle: self.handle,
            kind,
        };
        if self.tx.send(CoordinatorInput::Playback(signal)).is_err() {
            tracing::trace!(handle = %self.handle, "Playback signal after coordinator shutdown");
        }
    }
}

/// One platform playback instance (a buffer source node, a sink, ...).
pub trait PlaybackEngine: Send {
    /// Begin playing `audio` through `context`. Natural completion is
    /// reported through `events`.
    fn start(
        &mut self,
        context: &mut dyn AudioContext,
        audio: SpeechAudio,
        events: PlaybackEventSink,
    ) -> Result<(), PlaybackFailure>;

    /// Stop immediately. Must be safe after the buffer already drained.
    fn stop(&mut self);
}

/// Creates playback engines. Injected by the host.
pub trait PlaybackEngineFactory: Send + Sync {
    fn create(&self, handle: PlaybackHandle) -> Result<Box<dyn PlaybackEngine>, PlaybackFailure>;
}

/// Single-use outcome slot for one handle.
#[derive(Debug)]
pub struct PlaybackTicket {
    handle: PlaybackHandle,
    outcome_tx: oneshot::Sender<PlaybackOutcome>,
}

impl PlaybackTicket {
    pub const fn handle(&self) -> PlaybackHandle {
        self.handle
    }

    /// Resolve the handle. Consumes the ticket, so a handle cannot resolve twice.
    pub fn resolve(self, outcome: PlaybackOutcome) {
        // The caller may have dropped its `SpeakRequest`; that is fine.
        let _ = self.outcome_tx.send(outcome);
    }
}

/// Returned to callers of `request_speak`.
#[derive(Debug)]
pub struct SpeakRequest {
    handle: PlaybackHandle,
    outcome_rx: oneshot::Receiver<PlaybackOutcome>,
}

impl SpeakRequest {
    pub const fn handle(&self) -> PlaybackHandle {
        self.handle
    }

    /// Wait for the handle's terminal outcome.
    pub async fn outcome(self) -> Result<PlaybackOutcome, TurnError> {
        self.outcome_rx
            .await
            .map_err(|_| TurnError::CoordinatorStopped)
    }
}

/// Result of handing audio to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayStart {
    /// `started` was emitted and the engine is playing.
    Started,
    /// The handle was superseded or stopped before its audio arrived.
    Stale,
    /// The handle resolved `Failed` without producing sound.
    Failed(PlaybackFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingAudio,
    Playing,
}

struct InFlight {
    ticket: PlaybackTicket,
    phase: Phase,
    engine: Option<Box<dyn PlaybackEngine>>,
}

/// Tracks the single in-flight playback request.
pub struct PlaybackSession {
    factory: Box<dyn PlaybackEngineFactory>,
    inputs: mpsc::UnboundedSender<CoordinatorInput>,
    current: Option<InFlight>,
    next_seq: u64,
}

impl PlaybackSession {
    pub(crate) fn new(
        factory: Box<dyn PlaybackEngineFactory>,
        inputs: mpsc::UnboundedSender<CoordinatorInput>,
    ) -> Self {
        Self {
            factory,
            inputs,
            current: None,
            next_seq: 0,
        }
    }

    /// Mint a new handle with its outcome slot and the caller's receiver.
    pub fn issue(&mut self) -> (PlaybackTicket, SpeakRequest) {
        self.next_seq += 1;
        let handle = PlaybackHandle(self.next_seq);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        (
            PlaybackTicket { handle, outcome_tx },
            SpeakRequest { handle, outcome_rx },
        )
    }

    /// Make `ticket` the in-flight request, waiting for its audio.
    ///
    /// Last write wins: a request still in flight is interrupted and
    /// returned so the caller can report it.
    pub fn arm(&mut self, ticket: PlaybackTicket) -> Option<(PlaybackHandle, PlaybackOutcome)> {
        let displaced = self.interrupt_current();
        tracing::debug!(handle = %ticket.handle(), "Playback request armed");
        self.current = Some(InFlight {
            ticket,
            phase: Phase::AwaitingAudio,
            engine: None,
        });
        displaced
    }

    /// Whether `handle` is in flight and still waiting for audio.
    pub fn is_awaiting_audio(&self, handle: PlaybackHandle) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.ticket.handle() == handle && c.phase == Phase::AwaitingAudio)
    }

    /// Start playing `audio` for `handle`.
    ///
    /// `on_started` runs synchronously after the engine is ready and before
    /// it is told to start, so the caller can release the microphone before
    /// any sound is produced.
    pub fn play(
        &mut self,
        handle: PlaybackHandle,
        audio: SpeechAudio,
        lifecycle: &mut AudioContextLifecycle,
        on_started: impl FnOnce(PlaybackHandle),
    ) -> PlayStart {
        if !self.is_awaiting_audio(handle) {
            tracing::debug!(%handle, "Dropping audio for stale playback handle");
            return PlayStart::Stale;
        }

        let Some(context) = lifecycle.prepare_for_playback() else {
            return self.fail_current(PlaybackFailure::ContextUnavailable);
        };

        let mut engine = match self.factory.create(handle) {
            Ok(engine) => engine,
            Err(failure) => return self.fail_current(failure),
        };

        on_started(handle);

        let sink = PlaybackEventSink::new(handle, self.inputs.clone());
        let duration = audio.duration;
        if let Err(failure) = engine.start(context, audio, sink) {
            return self.fail_current(failure);
        }

        if let Some(current) = self.current.as_mut() {
            current.phase = Phase::Playing;
            current.engine = Some(engine);
        }
        tracing::debug!(%handle, duration_ms = duration.as_millis(), "Playback started");
        PlayStart::Started
    }

    /// Resolve `handle` as failed if it is still waiting for audio.
    pub fn fail(&mut self, handle: PlaybackHandle, failure: PlaybackFailure) -> bool {
        if !self.is_awaiting_audio(handle) {
            return false;
        }
        self.fail_current(failure);
        true
    }

    /// Stop `handle` immediately. No-op for handles that already resolved.
    pub fn interrupt(&mut self, handle: PlaybackHandle) -> Option<PlaybackOutcome> {
        if self.current_handle() != Some(handle) {
            return None;
        }
        self.interrupt_current().map(|(_, outcome)| outcome)
    }

    /// Stop whatever is in flight.
    pub fn interrupt_current(&mut self) -> Option<(PlaybackHandle, PlaybackOutcome)> {
        let mut current = self.current.take()?;
        if let Some(engine) = current.engine.as_mut() {
            engine.stop();
        }
        let handle = current.ticket.handle();
        current.ticket.resolve(PlaybackOutcome::Interrupted);
        tracing::debug!(%handle, "Playback interrupted");
        Some((handle, PlaybackOutcome::Interrupted))
    }

    /// Apply an engine signal. Stale signals return `None`.
    pub fn accept(&mut self, signal: PlaybackSignal) -> Option<(PlaybackHandle, PlaybackOutcome)> {
        let is_current_playing = self
            .current
            .as_ref()
            .is_some_and(|c| c.ticket.handle() == signal.handle && c.phase == Phase::Playing);
        if !is_current_playing {
            tracing::debug!(handle = %signal.handle, "Dropping stale playback signal");
            return None;
        }

        let current = self.current.take()?;
        let outcome = match signal.kind {
            PlaybackSignalKind::Finished => PlaybackOutcome::Completed,
            PlaybackSignalKind::Failed(detail) => {
                PlaybackOutcome::Failed(PlaybackFailure::Engine(detail))
            }
        };
        current.ticket.resolve(outcome.clone());
        Some((signal.handle, outcome))
    }

    /// The in-flight handle, if any.
    pub fn current_handle(&self) -> Option<PlaybackHandle> {
        self.current.as_ref().map(|c| c.ticket.handle())
    }

    /// Whether any handle is non-terminal (waiting for audio or playing).
    pub const fn has_pending(&self) -> bool {
        self.current.is_some()
    }

    /// Whether audio is actually being produced.
    pub fn is_playing(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.phase == Phase::Playing)
    }

    fn fail_current(&mut self, failure: PlaybackFailure) -> PlayStart {
        if let Some(mut current) = self.current.take() {
            if let Some(engine) = current.engine.as_mut() {
                engine.stop();
            }
            tracing::warn!(handle = %current.ticket.handle(), %failure, "Playback failed");
            current
                .ticket
                .resolve(PlaybackOutcome::Failed(failure.clone()));
        }
        PlayStart::Failed(failure)
    }
}
