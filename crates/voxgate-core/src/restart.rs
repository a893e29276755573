//! Debounced capture restarts via cancellable tokens.
//!
//! Timers are never cancelled directly. Arming a restart mints a fresh
//! token and invalidates the previous one; when a timer fires it presents
//! its token and is honored only if that token is still the armed one.
//! At most one restart is ever honored per arm.

use serde::{Deserialize, Serialize};

/// Opaque token carried by a restart timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestartToken(u64);

/// Arms, invalidates and redeems restart tokens.
#[derive(Debug, Default)]
pub struct RestartGate {
    generation: u64,
    armed: Option<RestartToken>,
}

impl RestartGate {
    pub const fn new() -> Self {
        Self {
            generation: 0,
            armed: None,
        }
    }

    /// Mint a token for a new timer, invalidating any earlier one.
    pub fn arm(&mut self) -> RestartToken {
        self.generation += 1;
        let token = RestartToken(self.generation);
        if let Some(previous) = self.armed.replace(token) {
            tracing::trace!(previous = previous.0, token = token.0, "Restart re-armed");
        }
        token
    }

    /// Invalidate the armed token, if any. Returns `true` if one was armed.
    pub fn invalidate(&mut self) -> bool {
        self.armed.take().is_some()
    }

    /// Consume `token` if it is still the armed one.
    pub fn redeem(&mut self, token: RestartToken) -> bool {
        if self.armed == Some(token) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    /// Whether a restart is pending.
    pub const fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}
