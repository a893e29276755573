//! Audio context lifecycle: one shared playback context per session.
//!
//! The context is created lazily on first need with the policy's preferred
//! parameters and reused afterwards. Mobile browsers create it suspended and
//! only allow `resume()` inside a user gesture, so the lifecycle arms a set
//! of gesture "listeners" (the host forwards gestures through the
//! coordinator) and retries on every qualifying gesture until the context
//! runs. Failures here are never fatal: they are logged and retried, and
//! callers only ever see [`ContextState`].

use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::policy::{ContextParams, PlatformQuirkPolicy};

/// Observable state of the shared playback context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// User interactions the host forwards to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    PointerDown,
    PointerUp,
    Click,
    TouchStart,
    TouchEnd,
    KeyDown,
    Scroll,
}

impl GestureKind {
    /// Gestures that grant user activation for audio on every platform.
    pub const UNLOCKING: [Self; 4] = [Self::PointerUp, Self::Click, Self::TouchEnd, Self::KeyDown];

    /// Whether this gesture may unlock audio.
    pub const fn unlocks_audio(self) -> bool {
        matches!(
            self,
            Self::PointerUp | Self::Click | Self::TouchEnd | Self::KeyDown
        )
    }
}

/// A platform playback context (a Web Audio `AudioContext`, a native output
/// stream, ...).
#[cfg_attr(test, mockall::automock)]
pub trait AudioContext: Send {
    /// Current platform state.
    fn state(&self) -> ContextState;

    /// Actual output sample rate.
    fn sample_rate(&self) -> u32;

    /// Ask the platform to resume output.
    fn resume(&mut self) -> Result<(), ContextError>;

    /// Play a near-silent one-sample buffer to force full pipeline start.
    fn play_unlock_sample(&mut self) -> Result<(), ContextError>;

    /// Push a minimal gain graph through the context once.
    fn pulse_gain_graph(&mut self) -> Result<(), ContextError>;
}

/// Creates platform playback contexts. Injected by the host.
#[cfg_attr(test, mockall::automock)]
pub trait AudioContextFactory: Send + Sync {
    fn create(&self, params: ContextParams) -> Result<Box<dyn AudioContext>, ContextError>;
}

/// Owns the shared playback context.
pub struct AudioContextLifecycle {
    factory: Box<dyn AudioContextFactory>,
    policy: PlatformQuirkPolicy,
    context: Option<Box<dyn AudioContext>>,
    create_failed: bool,
    unlock_armed: bool,
    unlock_attempts: u32,
    pre_warmed: bool,
}

impl AudioContextLifecycle {
    pub fn new(factory: Box<dyn AudioContextFactory>, policy: PlatformQuirkPolicy) -> Self {
        Self {
            factory,
            policy,
            context: None,
            create_failed: false,
            unlock_armed: false,
            unlock_attempts: 0,
            pre_warmed: false,
        }
    }

    /// Return the shared context, creating it on first use.
    ///
    /// A closed context is replaced; a running one is never recreated.
    /// Returns `None` only when the platform refuses to create one.
    pub fn ensure_context(&mut self) -> Option<&mut (dyn AudioContext + 'static)> {
        let needs_create = self
            .context
            .as_ref()
            .is_none_or(|ctx| ctx.state() == ContextState::Closed);

        if needs_create {
            if self.context.is_some() {
                tracing::info!("Audio context was closed, creating a new one");
            }
            let params = self.policy.context_params();
            match self.factory.create(params) {
                Ok(ctx) => {
                    tracing::info!(
                        sample_rate = ctx.sample_rate(),
                        state = ?ctx.state(),
                        policy = %self.policy,
                        "Audio context created"
                    );
                    self.context = Some(ctx);
                    self.create_failed = false;
                    self.pre_warmed = false;
                }
                Err(e) => {
                    if !self.create_failed {
                        tracing::warn!(error = %e, "Failed to create audio context");
                    }
                    self.context = None;
                    self.create_failed = true;
                    return None;
                }
            }
        }

        self.context.as_deref_mut()
    }

    /// Current context state. A context that has not been created yet
    /// reports `Suspended`; one the platform refused reports `Closed`.
    pub fn state(&self) -> ContextState {
        match &self.context {
            Some(ctx) => ctx.state(),
            None if self.create_failed => ContextState::Closed,
            None => ContextState::Suspended,
        }
    }

    /// Arm the gesture listeners. No-op once the context is running.
    pub fn unlock(&mut self) {
        if self.state() == ContextState::Running {
            return;
        }
        if !self.unlock_armed {
            self.unlock_armed = true;
            tracing::debug!(gestures = ?GestureKind::UNLOCKING, "Audio unlock listeners armed");
        }
    }

    /// Whether the lifecycle is still waiting for a qualifying gesture.
    pub const fn is_unlock_armed(&self) -> bool {
        self.unlock_armed
    }

    /// React to a user gesture. Returns `true` if this gesture unlocked audio.
    pub fn on_gesture(&mut self, gesture: GestureKind) -> bool {
        if !self.unlock_armed || !gesture.unlocks_audio() {
            return false;
        }
        self.attempt_unlock("gesture")
    }

    /// React to page visibility changes. Returning to the foreground
    /// re-attempts a resume when audio is locked or was suspended by the OS.
    pub fn on_visibility_change(&mut self, visible: bool) -> bool {
        if !visible {
            return false;
        }
        if self.unlock_armed || self.state() == ContextState::Suspended {
            return self.attempt_unlock("visibility");
        }
        false
    }

    /// Push the warm-up graph through a running context once.
    pub fn pre_warm(&mut self) -> bool {
        if !self.policy.requires_pre_warm() || self.pre_warmed {
            return false;
        }
        let Some(ctx) = self.context.as_deref_mut() else {
            return false;
        };
        if ctx.state() != ContextState::Running {
            return false;
        }
        match ctx.pulse_gain_graph() {
            Ok(()) => {
                self.pre_warmed = true;
                tracing::debug!("Audio context pre-warmed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Audio context pre-warm failed");
                false
            }
        }
    }

    /// Get the context ready for a playback request.
    ///
    /// Tries a resume if the context is suspended. When that is refused the
    /// listeners are re-armed and playback proceeds anyway; the platform
    /// starts producing sound once a gesture unlocks it.
    pub fn prepare_for_playback(&mut self) -> Option<&mut (dyn AudioContext + 'static)> {
        {
            let ctx = self.ensure_context()?;
            if ctx.state() == ContextState::Suspended {
                if let Err(e) = ctx.resume() {
                    tracing::debug!(error = %e, "Resume before playback refused");
                }
            }
        }

        if self.state() == ContextState::Running {
            self.pre_warm();
        } else {
            self.unlock();
        }
        self.context.as_deref_mut()
    }

    fn attempt_unlock(&mut self, trigger: &'static str) -> bool {
        self.unlock_attempts += 1;
        let attempt = self.unlock_attempts;
        let policy = self.policy;

        let Some(ctx) = self.ensure_context() else {
            self.unlock_armed = true;
            return false;
        };

        match resume_with_policy(ctx, policy) {
            Ok(()) => {
                self.unlock_armed = false;
                tracing::info!(trigger, attempt, "Audio context unlocked");
                self.pre_warm();
                true
            }
            Err(e) => {
                self.unlock_armed = true;
                tracing::warn!(
                    trigger,
                    attempt,
                    error = %e,
                    "Audio unlock failed, waiting for next gesture"
                );
                false
            }
        }
    }
}

/// One unlock attempt: resume, then the policy's silent sample.
fn resume_with_policy(
    ctx: &mut dyn AudioContext,
    policy: PlatformQuirkPolicy,
) -> Result<(), ContextError> {
    if ctx.state() != ContextState::Running {
        ctx.resume()?;
    }
    if policy.requires_unlock_sample() {
        ctx.play_unlock_sample()?;
    }
    if ctx.state() == ContextState::Running {
        Ok(())
    } else {
        Err(ContextError::Resume("context still suspended".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Mock context whose state flips to running once `resume` succeeds.
    /// `resume` fails for the first `failures` calls.
    fn gated_context(running: &Arc<AtomicBool>, failures: usize) -> MockAudioContext {
        let mut ctx = MockAudioContext::new();
        let r = Arc::clone(running);
        ctx.expect_state().returning(move || {
            if r.load(Ordering::SeqCst) {
                ContextState::Running
            } else {
                ContextState::Suspended
            }
        });
        ctx.expect_sample_rate().return_const(48_000u32);

        let r = Arc::clone(running);
        let calls = AtomicUsize::new(0);
        ctx.expect_resume().returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) < failures {
                Err(ContextError::Resume("no user activation".into()))
            } else {
                r.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        ctx
    }

    fn factory_for(ctx: MockAudioContext) -> Box<MockAudioContextFactory> {
        let mut factory = MockAudioContextFactory::new();
        factory
            .expect_create()
            .times(1)
            .return_once(move |_| Ok(Box::new(ctx) as Box<dyn AudioContext>));
        Box::new(factory)
    }

    #[test]
    fn context_is_created_once_and_reused() {
        let running = Arc::new(AtomicBool::new(true));
        let ctx = gated_context(&running, 0);
        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::Default);

        assert_eq!(lifecycle.state(), ContextState::Suspended);
        assert!(lifecycle.ensure_context().is_some());
        assert!(lifecycle.ensure_context().is_some());
        assert_eq!(lifecycle.state(), ContextState::Running);
    }

    #[test]
    fn factory_failure_reports_closed_and_never_panics() {
        let mut factory = MockAudioContextFactory::new();
        factory
            .expect_create()
            .times(2)
            .returning(|_| Err(ContextError::Create("no output device".into())));
        let mut lifecycle =
            AudioContextLifecycle::new(Box::new(factory), PlatformQuirkPolicy::Default);

        assert!(lifecycle.ensure_context().is_none());
        assert_eq!(lifecycle.state(), ContextState::Closed);
        assert!(lifecycle.ensure_context().is_none());
    }

    #[test]
    fn closed_context_is_replaced() {
        let mut closed = MockAudioContext::new();
        closed.expect_state().return_const(ContextState::Closed);
        closed.expect_sample_rate().return_const(48_000u32);

        let mut fresh = MockAudioContext::new();
        fresh.expect_state().return_const(ContextState::Running);
        fresh.expect_sample_rate().return_const(48_000u32);

        let mut contexts = vec![fresh, closed];
        let mut factory = MockAudioContextFactory::new();
        factory.expect_create().times(2).returning(move |_| {
            let ctx = contexts.pop().expect("two contexts");
            Ok(Box::new(ctx) as Box<dyn AudioContext>)
        });

        let mut lifecycle =
            AudioContextLifecycle::new(Box::new(factory), PlatformQuirkPolicy::Default);
        assert!(lifecycle.ensure_context().is_some());
        assert!(lifecycle.ensure_context().is_some());
        assert_eq!(lifecycle.state(), ContextState::Running);
    }

    #[test]
    fn only_qualifying_gestures_unlock() {
        let running = Arc::new(AtomicBool::new(false));
        let ctx = gated_context(&running, 0);
        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::Default);

        assert!(!lifecycle.on_gesture(GestureKind::Click), "not armed yet");
        lifecycle.unlock();
        assert!(lifecycle.is_unlock_armed());

        assert!(!lifecycle.on_gesture(GestureKind::Scroll));
        assert!(!lifecycle.on_gesture(GestureKind::PointerDown));
        assert!(lifecycle.is_unlock_armed());

        assert!(lifecycle.on_gesture(GestureKind::PointerUp));
        assert!(!lifecycle.is_unlock_armed());
        assert_eq!(lifecycle.state(), ContextState::Running);

        assert!(!lifecycle.on_gesture(GestureKind::Click), "listeners removed");
    }

    #[test]
    fn failed_resume_keeps_listeners_armed() {
        let running = Arc::new(AtomicBool::new(false));
        let ctx = gated_context(&running, 2);
        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::Default);
        lifecycle.unlock();

        assert!(!lifecycle.on_gesture(GestureKind::TouchEnd));
        assert!(lifecycle.is_unlock_armed());
        assert!(!lifecycle.on_gesture(GestureKind::KeyDown));
        assert!(lifecycle.on_gesture(GestureKind::Click));
        assert!(!lifecycle.is_unlock_armed());
    }

    #[test]
    fn ios_unlock_plays_silent_sample_and_pre_warms() {
        let running = Arc::new(AtomicBool::new(false));
        let mut ctx = gated_context(&running, 0);
        ctx.expect_play_unlock_sample().times(1).returning(|| Ok(()));
        ctx.expect_pulse_gain_graph().times(1).returning(|| Ok(()));

        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::IosWebKit);
        lifecycle.unlock();
        assert!(lifecycle.on_gesture(GestureKind::TouchEnd));

        // Already warm: a second pass does nothing.
        assert!(!lifecycle.pre_warm());
    }

    #[test]
    fn default_policy_skips_silent_sample() {
        let running = Arc::new(AtomicBool::new(false));
        let mut ctx = gated_context(&running, 0);
        ctx.expect_play_unlock_sample().never();
        ctx.expect_pulse_gain_graph().never();

        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::Default);
        lifecycle.unlock();
        assert!(lifecycle.on_gesture(GestureKind::Click));
    }

    #[test]
    fn returning_to_foreground_retries_resume() {
        let running = Arc::new(AtomicBool::new(false));
        let ctx = gated_context(&running, 0);
        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::Default);
        lifecycle.unlock();

        assert!(!lifecycle.on_visibility_change(false));
        assert!(lifecycle.on_visibility_change(true));
        assert_eq!(lifecycle.state(), ContextState::Running);
    }

    #[test]
    fn refused_resume_before_playback_rearms_unlock() {
        let running = Arc::new(AtomicBool::new(false));
        let ctx = gated_context(&running, usize::MAX);
        let mut lifecycle =
            AudioContextLifecycle::new(factory_for(ctx), PlatformQuirkPolicy::Default);

        assert!(lifecycle.prepare_for_playback().is_some());
        assert!(lifecycle.is_unlock_armed());
        assert_eq!(lifecycle.state(), ContextState::Suspended);
    }
}
