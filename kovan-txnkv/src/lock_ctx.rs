use crate::key::Key;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long `lock_keys` may wait for a contended key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockWait {
    /// Wait until acquired; bounded only by the transaction's own deadline.
    #[default]
    AlwaysWait,
    /// One attempt; contention fails immediately.
    NoWait,
    /// Wait up to the given budget, then time out.
    Timeout(Duration),
}

impl LockWait {
    /// `0` waits forever, a negative value means no-wait, anything else is a
    /// budget in milliseconds.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => LockWait::AlwaysWait,
            ms if ms < 0 => LockWait::NoWait,
            ms => LockWait::Timeout(Duration::from_millis(ms as u64)),
        }
    }
}

/// Cooperative cancellation token for lock waits.
///
/// Clones share the same flag. The waiting thread polls it between attempts.
#[derive(Debug, Clone, Default)]
pub struct KillSignal(Arc<AtomicBool>);

impl KillSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A key's state as returned by a successful lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnedValue {
    /// `None` when the key does not exist or values were not requested.
    pub value: Option<Bytes>,
    /// The key was already locked by this transaction before the call.
    pub already_locked: bool,
}

/// Counters of one `lock_keys` call, filled on success and failure alike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockKeysStats {
    /// Keys requested, after dropping ones already locked locally.
    pub lock_keys_count: usize,
    /// Lock requests sent to the lock client.
    pub attempts: u32,
    /// Wall time spent in the call.
    pub total_wait: Duration,
    /// Whether any attempt found a key held by another transaction.
    pub waited: bool,
}

/// Per-call request and result slots for `Transaction::lock_keys`.
#[derive(Debug, Clone)]
pub struct LockCtx {
    pub for_update_ts: u64,
    pub lock_wait: LockWait,
    /// Start of the wait budget; `None` starts it when the call begins.
    pub wait_start: Option<Instant>,
    pub killed: KillSignal,
    pub return_values: bool,
    pub values: HashMap<Key, ReturnedValue>,
    pub stats: LockKeysStats,
}

impl LockCtx {
    pub fn new(for_update_ts: u64, lock_wait: LockWait) -> Self {
        Self {
            for_update_ts,
            lock_wait,
            wait_start: None,
            killed: KillSignal::new(),
            return_values: false,
            values: HashMap::new(),
            stats: LockKeysStats::default(),
        }
    }

    pub fn with_kill_signal(mut self, killed: KillSignal) -> Self {
        self.killed = killed;
        self
    }

    pub fn with_return_values(mut self) -> Self {
        self.return_values = true;
        self
    }

    pub fn with_wait_start(mut self, at: Instant) -> Self {
        self.wait_start = Some(at);
        self
    }

    /// Whether `key` was reported as already locked by this transaction.
    pub fn already_locked(&self, key: &Key) -> bool {
        self.values.get(key).is_some_and(|v| v.already_locked)
    }

    /// Time left before the budget expires, `None` when unbounded.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.lock_wait {
            LockWait::AlwaysWait => None,
            LockWait::NoWait => Some(Duration::ZERO),
            LockWait::Timeout(budget) => {
                let start = self.wait_start.unwrap_or(now);
                Some(budget.saturating_sub(now.saturating_duration_since(start)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_wait_from_millis() {
        assert_eq!(LockWait::from_millis(0), LockWait::AlwaysWait);
        assert_eq!(LockWait::from_millis(-1), LockWait::NoWait);
        assert_eq!(
            LockWait::from_millis(250),
            LockWait::Timeout(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_kill_signal_is_shared_by_clones() {
        let signal = KillSignal::new();
        let ctx = LockCtx::new(1, LockWait::AlwaysWait).with_kill_signal(signal.clone());
        assert!(!ctx.killed.is_killed());
        signal.kill();
        assert!(ctx.killed.is_killed());
    }

    #[test]
    fn test_remaining_budget() {
        let start = Instant::now();
        let ctx = LockCtx::new(1, LockWait::Timeout(Duration::from_millis(100)))
            .with_wait_start(start);
        assert_eq!(
            ctx.remaining(start + Duration::from_millis(40)),
            Some(Duration::from_millis(60))
        );
        assert_eq!(
            ctx.remaining(start + Duration::from_millis(400)),
            Some(Duration::ZERO)
        );
        assert_eq!(LockCtx::new(1, LockWait::AlwaysWait).remaining(start), None);
    }
}
