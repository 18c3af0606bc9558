//! Cooperative shutdown signal.
//!
//! Every blocking wait in the engine (accept, outbound calls, periodic
//! timers, vote collection) is multiplexed against this signal, so a single
//! `trigger()` unblocks all of them promptly. `restart` installs a fresh
//! token so a revived peer does not observe the previous run's cancellation.

use std::sync::RwLock;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ShutdownSignal {
    token: RwLock<CancellationToken>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: RwLock::new(CancellationToken::new()),
        }
    }

    /// Current token, for `tokio::select!` arms that need to own one.
    pub fn token(&self) -> CancellationToken {
        self.token.read().expect("shutdown token lock poisoned").clone()
    }

    /// Signal shutdown. Idempotent: cancelling a cancelled token is a no-op.
    pub fn trigger(&self) {
        self.token
            .read()
            .expect("shutdown token lock poisoned")
            .cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token
            .read()
            .expect("shutdown token lock poisoned")
            .is_cancelled()
    }

    /// Replace the token. Only meaningful between runs (restart).
    pub fn reset(&self) {
        *self.token.write().expect("shutdown token lock poisoned") = CancellationToken::new();
    }

    /// Sleep for `duration`, waking early if the signal fires.
    /// Returns true if shutdown was signalled.
    pub async fn sleep_unless_triggered(&self, duration: Duration) -> bool {
        let token = self.token();
        tokio::select! {
            _ = token.cancelled_owned() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
