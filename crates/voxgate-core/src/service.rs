//! Coordinator actor: runs a [`TurnCoordinator`] on its own tokio task.
//!
//! [`CoordinatorHandle`] is the `Clone + Send + Sync` proxy the application
//! holds. Every command is a request/reply message, so when a call returns
//! the coordinator has finished reacting to it and the snapshot it
//! published is visible through [`CoordinatorHandle::snapshot`].
//!
//! Engine signals, timers and synthesis results share one input channel
//! with the coordinator and are processed strictly one at a time, in the
//! order they arrive, interleaved with commands.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::capture::CaptureEngineFactory;
use crate::config::TurnConfig;
use crate::context::{AudioContextFactory, GestureKind};
use crate::coordinator::{CoordinatorInput, TurnCoordinator};
use crate::error::{ConfigError, TurnError};
use crate::playback::{PlaybackEngineFactory, SpeakRequest};
use crate::policy::PlatformQuirkPolicy;
use crate::state::{TurnEvent, TurnSnapshot};
use crate::synthesis::SpeechSynthesizer;

/// Platform collaborators injected into the coordinator.
pub struct Collaborators {
    pub capture: Box<dyn CaptureEngineFactory>,
    pub playback: Box<dyn PlaybackEngineFactory>,
    pub context: Box<dyn AudioContextFactory>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

// ── Commands ───────────────────────────────────────────────────────

/// A command sent from a handle to the coordinator task.
enum Command {
    PressMicrophone {
        reply: oneshot::Sender<Result<(), TurnError>>,
    },

    ReleaseMicrophone {
        reply: oneshot::Sender<()>,
    },

    RequestSpeak {
        text: String,
        reply: oneshot::Sender<Result<SpeakRequest, TurnError>>,
    },

    StopSpeaking {
        reply: oneshot::Sender<()>,
    },

    /// A user gesture; replies whether it unlocked audio.
    Gesture {
        kind: GestureKind,
        reply: oneshot::Sender<bool>,
    },

    /// Page visibility changed; replies whether the context resumed.
    Visibility {
        visible: bool,
        reply: oneshot::Sender<bool>,
    },

    /// Release everything and stop the task.
    Shutdown { reply: oneshot::Sender<()> },
}

// ── Handle ─────────────────────────────────────────────────────────

/// Handle to a running coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<TurnSnapshot>,
    policy: PlatformQuirkPolicy,
}

impl CoordinatorHandle {
    /// Validate `config`, build the coordinator and spawn its task.
    ///
    /// `detected` is the platform policy the host detected; a policy forced
    /// in the config takes precedence. Must be called inside a tokio
    /// runtime. Returns the handle and the event stream.
    pub fn spawn(
        config: TurnConfig,
        detected: PlatformQuirkPolicy,
        collaborators: Collaborators,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TurnEvent>), ConfigError> {
        config.validate()?;
        let policy = config.resolve_policy(detected);

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (coordinator, events) = TurnCoordinator::new(config, policy, collaborators, input_tx);
        let snapshot_rx = coordinator.subscribe();

        tokio::spawn(run(coordinator, input_rx, cmd_rx));

        let handle = Self {
            cmd_tx,
            snapshot_rx,
            policy,
        };
        Ok((handle, events))
    }

    /// The platform policy in effect.
    pub const fn policy(&self) -> PlatformQuirkPolicy {
        self.policy
    }

    // ── Capture ────────────────────────────────────────────────────

    /// Toggle capture intent.
    pub async fn press_microphone(&self) -> Result<(), TurnError> {
        self.send_and_recv(|reply| Command::PressMicrophone { reply })
            .await?
    }

    /// Clear capture intent.
    pub async fn release_microphone(&self) -> Result<(), TurnError> {
        self.send_and_recv(|reply| Command::ReleaseMicrophone { reply })
            .await
    }

    // ── Playback ───────────────────────────────────────────────────

    /// Synthesize and play `text`. Await [`SpeakRequest::outcome`] for the
    /// terminal outcome.
    pub async fn request_speak(&self, text: impl Into<String>) -> Result<SpeakRequest, TurnError> {
        let text = text.into();
        self.send_and_recv(|reply| Command::RequestSpeak { text, reply })
            .await?
    }

    /// Interrupt the current playback.
    pub async fn stop_speaking(&self) -> Result<(), TurnError> {
        self.send_and_recv(|reply| Command::StopSpeaking { reply })
            .await
    }

    // ── Audio context ──────────────────────────────────────────────

    /// Forward a user gesture. Returns `true` if it unlocked audio.
    pub async fn gesture(&self, kind: GestureKind) -> Result<bool, TurnError> {
        self.send_and_recv(|reply| Command::Gesture { kind, reply })
            .await
    }

    /// Forward a page visibility change.
    pub async fn visibility_changed(&self, visible: bool) -> Result<bool, TurnError> {
        self.send_and_recv(|reply| Command::Visibility { visible, reply })
            .await
    }

    // ── State ──────────────────────────────────────────────────────

    /// The latest snapshot.
    pub fn snapshot(&self) -> TurnSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Snapshot stream; changes on every transition.
    pub fn subscribe(&self) -> watch::Receiver<TurnSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the coordinator task, releasing capture and playback.
    ///
    /// Calls on any clone of this handle fail with
    /// [`TurnError::CoordinatorStopped`] afterwards.
    pub async fn shutdown(&self) -> Result<(), TurnError> {
        self.send_and_recv(|reply| Command::Shutdown { reply })
            .await
    }

    // ── Internal helpers ───────────────────────────────────────────

    async fn send_and_recv<T>(
        &self,
        make_cmd: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TurnError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_cmd(reply_tx))
            .map_err(|_| TurnError::CoordinatorStopped)?;
        reply_rx.await.map_err(|_| TurnError::CoordinatorStopped)
    }
}

// ── Task loop ──────────────────────────────────────────────────────

async fn run(
    mut coordinator: TurnCoordinator,
    mut inputs: mpsc::UnboundedReceiver<CoordinatorInput>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    tracing::debug!("Coordinator task started");

    loop {
        tokio::select! {
            biased;

            Some(input) = inputs.recv() => coordinator.handle_input(input),

            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("All coordinator handles dropped");
                    coordinator.shutdown();
                    break;
                };
                if let Some(reply) = execute(&mut coordinator, command) {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    tracing::debug!("Coordinator task exited");
}

/// Run one command. Returns the shutdown reply when the task should stop.
fn execute(coordinator: &mut TurnCoordinator, command: Command) -> Option<oneshot::Sender<()>> {
    match command {
        Command::PressMicrophone { reply } => {
            let _ = reply.send(coordinator.press_microphone());
        }
        Command::ReleaseMicrophone { reply } => {
            coordinator.release_microphone();
            let _ = reply.send(());
        }
        Command::RequestSpeak { text, reply } => {
            let _ = reply.send(coordinator.request_speak(&text));
        }
        Command::StopSpeaking { reply } => {
            coordinator.stop_speaking();
            let _ = reply.send(());
        }
        Command::Gesture { kind, reply } => {
            let _ = reply.send(coordinator.gesture(kind));
        }
        Command::Visibility { visible, reply } => {
            let _ = reply.send(coordinator.visibility_changed(visible));
        }
        Command::Shutdown { reply } => {
            coordinator.shutdown();
            return Some(reply);
        }
    }
    None
}
