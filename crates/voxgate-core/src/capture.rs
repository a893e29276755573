//! Capture session: one logical "listen for speech" attempt.
//!
//! The platform engine (Web Speech recognizer, native recognizer, remote
//! stream) is created through an injected [`CaptureEngineFactory`]. Engines
//! report through a [`CaptureEventSink`] that is bound to a single attempt;
//! the session normalizes the raw signal stream so the coordinator sees, per
//! attempt:
//!
//! ```text
//!   Started? → (Interim* Final?)* → exactly one of { Ended, Error(kind) }
//! ```
//!
//! Signals from retired attempts (aborted, or replaced by a newer start) are
//! dropped here and never reach the state machine.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::coordinator::CoordinatorInput;
use crate::error::{CaptureErrorKind, CaptureStartError};

/// Options passed to the capture engine on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CaptureOptions {
    /// Keep listening across utterances.
    pub continuous: bool,
    /// Deliver partial transcripts.
    pub interim_results: bool,
    /// BCP 47 locale, e.g. `en-US`.
    pub locale: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            locale: "en-US".to_string(),
        }
    }
}

/// Identifies one capture attempt. Monotonically increasing per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaptureAttemptId(pub u64);

/// Raw signal emitted by a capture engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignalKind {
    Started,
    Result { text: String, is_final: bool },
    Error(CaptureErrorKind),
    Ended,
}

/// A raw engine signal tagged with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSignal {
    pub attempt: CaptureAttemptId,
    pub kind: CaptureSignalKind,
}

/// Normalized event delivered to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The engine confirmed it is listening.
    Started,
    /// Partial transcript.
    Interim(String),
    /// Final transcript for one utterance.
    Final(String),
    /// Terminal: the attempt finished without error.
    Ended,
    /// Terminal: the attempt failed.
    Error(CaptureErrorKind),
}

impl CaptureEvent {
    /// Whether this event closes the attempt.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Error(_))
    }
}

/// Handle given to a capture engine for reporting back to the coordinator.
///
/// Cloneable and `Send`, so engines may report from their own callback
/// threads. Sends after the coordinator stopped are ignored.
#[derive(Debug, Clone)]
pub struct CaptureEventSink {
    attempt: CaptureAttemptId,
    tx: mpsc::UnboundedSender<CoordinatorInput>,
}

impl CaptureEventSink {
    pub(crate) const fn new(
        attempt: CaptureAttemptId,
        tx: mpsc::UnboundedSender<CoordinatorInput>,
    ) -> Self {
        Self { attempt, tx }
    }

    /// The attempt this sink reports for.
    pub const fn attempt(&self) -> CaptureAttemptId {
        self.attempt
    }

    /// The engine is capturing audio.
    pub fn started(&self) {
        self.send(CaptureSignalKind::Started);
    }

    /// A partial or final transcript.
    pub fn result(&self, text: impl Into<String>, is_final: bool) {
        self.send(CaptureSignalKind::Result {
            text: text.into(),
            is_final,
        });
    }

    /// An already-normalized error.
    pub fn error(&self, kind: CaptureErrorKind) {
        self.send(CaptureSignalKind::Error(kind));
    }

    /// A platform error code, mapped through [`CaptureErrorKind::from_code`].
    pub fn error_code(&self, code: &str) {
        self.error(CaptureErrorKind::from_code(code));
    }

    /// The engine stopped.
    pub fn ended(&self) {
        self.send(CaptureSignalKind::Ended);
    }

    fn send(&self, kind: CaptureSignalKind) {
        let signal = CaptureSignal {
            attempt: self.attempt,
            kind,
        };
        if self.tx.send(CoordinatorInput::Capture(signal)).is_err() {
            tracing::trace!(attempt = self.attempt.0, "Capture signal after coordinator shutdown");
        }
    }
}

/// One instance of a platform speech-capture engine.
pub trait CaptureEngine: Send {
    /// Begin capturing. Results and the terminal event go to `events`.
    fn start(
        &mut self,
        options: &CaptureOptions,
        events: CaptureEventSink,
    ) -> Result<(), CaptureErrorKind>;

    /// Request a graceful end; a final result may still arrive.
    fn stop(&mut self);

    /// Terminate immediately without waiting for a final result.
    fn abort(&mut self);
}

/// Creates capture engines. Injected by the host.
pub trait CaptureEngineFactory: Send + Sync {
    /// Create an engine, or `None` when the host has no capture support.
    fn create(&self) -> Option<Box<dyn CaptureEngine>>;
}

/// Lifecycle of the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Starting,
    Running,
    Stopping,
}

struct ActiveAttempt {
    id: CaptureAttemptId,
    engine: Box<dyn CaptureEngine>,
    phase: AttemptPhase,
}

/// Wraps the capture engine and normalizes its event stream.
pub struct CaptureSession {
    factory: Box<dyn CaptureEngineFactory>,
    inputs: mpsc::UnboundedSender<CoordinatorInput>,
    active: Option<ActiveAttempt>,
    next_attempt: u64,
    unsupported: bool,
}

impl CaptureSession {
    pub(crate) fn new(
        factory: Box<dyn CaptureEngineFactory>,
        inputs: mpsc::UnboundedSender<CoordinatorInput>,
    ) -> Self {
        Self {
            factory,
            inputs,
            active: None,
            next_attempt: 0,
            unsupported: false,
        }
    }

    /// Start a new attempt, retiring any attempt still in flight.
    pub fn start(
        &mut self,
        options: &CaptureOptions,
    ) -> Result<CaptureAttemptId, CaptureStartError> {
        if self.unsupported {
            return Err(CaptureStartError::UnsupportedPlatform);
        }

        if self.active.is_some() {
            tracing::debug!("Capture start while an attempt is live, aborting the old attempt");
            self.abort();
        }

        let Some(mut engine) = self.factory.create() else {
            self.unsupported = true;
            tracing::error!("No speech capture engine on this platform, capture disabled");
            return Err(CaptureStartError::UnsupportedPlatform);
        };

        self.next_attempt += 1;
        let id = CaptureAttemptId(self.next_attempt);
        let sink = CaptureEventSink::new(id, self.inputs.clone());

        engine
            .start(options, sink)
            .map_err(CaptureStartError::Engine)?;

        tracing::debug!(
            attempt = id.0,
            continuous = options.continuous,
            locale = %options.locale,
            "Capture attempt started"
        );
        self.active = Some(ActiveAttempt {
            id,
            engine,
            phase: AttemptPhase::Starting,
        });
        Ok(id)
    }

    /// Ask the engine to finish gracefully. The attempt stays live until its
    /// terminal event arrives, so a trailing final result is still delivered.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if active.phase != AttemptPhase::Stopping {
                active.engine.stop();
                active.phase = AttemptPhase::Stopping;
                tracing::debug!(attempt = active.id.0, "Capture stop requested");
            }
        }
    }

    /// Terminate the current attempt immediately and retire it.
    ///
    /// Returns `true` if an attempt was live. Anything the engine reports for
    /// the retired attempt afterwards is dropped.
    pub fn abort(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        active.engine.abort();
        tracing::debug!(attempt = active.id.0, "Capture attempt aborted");
        true
    }

    /// Normalize a raw engine signal.
    ///
    /// Returns `None` for signals from retired attempts.
    pub fn accept(&mut self, signal: CaptureSignal) -> Option<CaptureEvent> {
        let Some(active) = self.active.as_mut() else {
            tracing::trace!(attempt = signal.attempt.0, "Dropping capture signal: no live attempt");
            return None;
        };
        if active.id != signal.attempt {
            tracing::trace!(
                attempt = signal.attempt.0,
                current = active.id.0,
                "Dropping stale capture signal"
            );
            return None;
        }

        let event = match signal.kind {
            CaptureSignalKind::Started => {
                if active.phase != AttemptPhase::Starting {
                    return None;
                }
                active.phase = AttemptPhase::Running;
                CaptureEvent::Started
            }
            CaptureSignalKind::Result { text, is_final } => {
                if active.phase == AttemptPhase::Starting {
                    active.phase = AttemptPhase::Running;
                }
                if is_final {
                    CaptureEvent::Final(text)
                } else {
                    CaptureEvent::Interim(text)
                }
            }
            CaptureSignalKind::Error(kind) => CaptureEvent::Error(kind),
            CaptureSignalKind::Ended => CaptureEvent::Ended,
        };

        if event.is_terminal() {
            self.active = None;
        }
        Some(event)
    }

    /// Current attempt, if one is live.
    pub fn current_attempt(&self) -> Option<CaptureAttemptId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Whether the engine has confirmed it is listening.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.phase == AttemptPhase::Running)
    }

    /// Whether capture was reported unsupported on this host.
    pub const fn is_unsupported(&self) -> bool {
        self.unsupported
    }
}
