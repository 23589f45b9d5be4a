use std::time::Duration;

/// What the lock-wait loop does before its next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffAction {
    /// Yield the current thread and retry
    Yield,
    /// Let the next attempt block on the key for up to this long
    Wait(Duration),
    /// Give up; the caller reports a lock-wait timeout
    Abort,
}

/// Pluggable pacing for retries on a contended pessimistic lock.
///
/// The lock-wait budget and the kill signal are enforced by the caller; a
/// strategy only decides how long each slice is.
pub trait BackoffStrategy: Send + Sync {
    /// Determine the action to take for a given attempt number (0-indexed)
    fn backoff(&self, attempt: u32) -> BackoffAction;
}

/// Default lock-wait pacing: one yield, then exponentially growing waits
/// capped at `poll`, so the kill signal is observed at least every `poll`.
#[derive(Debug, Clone)]
pub struct LockWaitBackoff {
    poll: Duration,
    max_attempts: Option<u32>,
}

impl LockWaitBackoff {
    pub fn new(poll: Duration) -> Self {
        Self {
            poll: poll.max(Duration::from_micros(1)),
            max_attempts: None,
        }
    }

    /// Aborts after `n` attempts regardless of the remaining budget.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn poll(&self) -> Duration {
        self.poll
    }
}

impl BackoffStrategy for LockWaitBackoff {
    fn backoff(&self, attempt: u32) -> BackoffAction {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return BackoffAction::Abort;
        }
        match attempt {
            0 => BackoffAction::Yield,
            1..6 => {
                let step = Duration::from_micros(250 << (attempt - 1));
                BackoffAction::Wait(step.min(self.poll))
            }
            _ => BackoffAction::Wait(self.poll),
        }
    }
}
