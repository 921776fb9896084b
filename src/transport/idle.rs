//! Idle deadline bookkeeping.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Sliding inactivity deadline.
///
/// Any task may [`touch`](Self::touch) it; only the owning peer loop acts on
/// expiry. The deadline sits behind its own lock so resetting it never
/// contends with the multiplexer's peer table.
#[derive(Debug)]
pub struct IdleTimer {
    timeout: Option<Duration>,
    deadline: Mutex<Option<Instant>>,
}

impl IdleTimer {
    /// Start a timer expiring `timeout` from now. `None` never expires.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: Mutex::new(timeout.map(|t| Instant::now() + t)),
        }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Push the deadline to `now + timeout`.
    pub fn touch(&self) {
        if let Some(timeout) = self.timeout {
            *self.lock() = Some(Instant::now() + timeout);
        }
    }

    /// Current deadline.
    pub fn deadline(&self) -> Option<Instant> {
        *self.lock()
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
