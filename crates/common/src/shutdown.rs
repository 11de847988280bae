//! Shutdown signal shared between the signal handler and the heartbeat thread
//!
//! The heartbeat driver is a plain blocking loop. Every pause it takes goes
//! through [`ShutdownSignal::wait_timeout`], so triggering the signal from
//! the async side wakes it at the next pause point instead of after a full
//! backoff period.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

/// Cloneable, one-way cancellation flag
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self) {
        let mut triggered = self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *triggered = true;
        self.inner.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `timeout` unless shutdown is requested first
    ///
    /// Returns `true` if shutdown was requested, before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let (guard, _) = self
            .inner
            .condvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(|e| e.into_inner());

        *guard
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_untriggered() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_trigger_is_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        signal.trigger();
        assert!(clone.is_triggered());
        assert!(clone.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn test_trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
    }
}
