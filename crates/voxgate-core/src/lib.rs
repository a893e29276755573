//! Audio turn-taking coordinator.
//!
//! Keeps a live microphone capture and synthesized-speech playback from ever
//! being active at the same time, across platforms whose audio APIs start
//! late, fail silently, or need a user gesture before they produce sound.
//!
//! The host injects the platform pieces ([`CaptureEngineFactory`],
//! [`PlaybackEngineFactory`], [`AudioContextFactory`], [`SpeechSynthesizer`])
//! and drives the coordinator through a [`CoordinatorHandle`]:
//!
//! ```ignore
//! let (handle, mut events) = CoordinatorHandle::spawn(config, policy, collaborators)?;
//! handle.press_microphone().await?;
//! let request = handle.request_speak("Hello there").await?;
//! let outcome = request.outcome().await?;
//! ```
//!
//! Platform differences (notably iOS WebKit timing and unlock rules) live in
//! [`PlatformQuirkPolicy`] and nowhere else.

pub mod capture;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod playback;
pub mod policy;
pub mod restart;
pub mod service;
pub mod state;
pub mod synthesis;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export key types for convenience
pub use capture::{CaptureEngine, CaptureEngineFactory, CaptureEventSink, CaptureOptions};
pub use config::{OverlapPolicy, TurnConfig};
pub use context::{AudioContext, AudioContextFactory, ContextState, GestureKind};
pub use coordinator::TurnCoordinator;
pub use error::{
    CaptureErrorKind, ConfigError, ContextError, PlaybackFailure, SynthesisError, TurnError,
};
pub use playback::{
    PlaybackEngine, PlaybackEngineFactory, PlaybackEventSink, PlaybackHandle, PlaybackOutcome,
    SpeakRequest,
};
pub use policy::PlatformQuirkPolicy;
pub use service::{Collaborators, CoordinatorHandle};
pub use state::{SurfacedError, SurfacedErrorKind, TurnEvent, TurnSnapshot, TurnState, VisualState};
pub use synthesis::{SpeechAudio, SpeechSynthesizer};
