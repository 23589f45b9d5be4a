use super::Transaction;
use crate::backoff::BackoffAction;
use crate::error::{KvError, Result};
use crate::flags::{FlagsOp, KeyFlags};
use crate::key::Key;
use crate::lock_ctx::{LockCtx, LockWait, ReturnedValue};
use crate::membuffer::Lookup;
use crate::remote::{LockOutcome, LockRequest};
use bytes::Bytes;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// The key an attempt stopped at, held by another transaction.
struct Blocked {
    key: Key,
    holder_start_ts: u64,
    /// The lock client already waited before answering.
    waited: bool,
}

impl Transaction {
    /// Acquires pessimistic locks on `keys`.
    ///
    /// Keys this transaction already holds succeed immediately and are reported
    /// as already locked in `ctx.values`, with their value read locally when
    /// `ctx.return_values` is set. While a key is held by another
    /// transaction the call waits according to `ctx.lock_wait`, polling the
    /// kill signals between attempts. Keys locked before a failure stay locked
    /// and flagged; the caller decides whether to roll back.
    ///
    /// In an optimistic transaction nothing is sent: keys without a buffered
    /// write are marked lock-only so the commit checks them for conflicts.
    pub fn lock_keys(&mut self, ctx: &mut LockCtx, keys: &[Key]) -> Result<()> {
        self.check_valid()?;
        let started = Instant::now();
        if ctx.wait_start.is_none() {
            ctx.wait_start = Some(started);
        }

        let mut seen = HashSet::with_capacity(keys.len());
        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            let flags = self.mem_buffer().get_flags(key).unwrap_or_default();
            if flags.has_locked() {
                let value = if ctx.return_values {
                    self.held_value(ctx, key, flags)?
                } else {
                    None
                };
                ctx.values.insert(
                    key.clone(),
                    ReturnedValue {
                        value,
                        already_locked: true,
                    },
                );
                continue;
            }
            pending.push(key.clone());
        }
        ctx.stats.lock_keys_count += pending.len();
        if pending.is_empty() {
            return Ok(());
        }
        self.primary.get_or_insert_with(|| pending[0].clone());

        if !self.is_pessimistic() {
            for key in &pending {
                if matches!(self.mem_buffer().lookup(key), Lookup::Missing(_)) {
                    self.mem_buffer().update_flags(key.clone(), &[FlagsOp::SetLockOnly]);
                }
            }
            return Ok(());
        }

        let result = self.acquire(ctx, &pending);
        ctx.stats.total_wait += started.elapsed();
        self.for_update_ts = self.for_update_ts.max(ctx.for_update_ts);
        result
    }

    fn acquire(&self, ctx: &mut LockCtx, keys: &[Key]) -> Result<()> {
        let poll = self.parts.config.lock_wait_poll();
        let primary = self.primary.clone().unwrap_or_else(|| keys[0].clone());
        let mut remaining = keys;
        let mut attempt = 0u32;
        let mut wait = Duration::ZERO;

        loop {
            if ctx.killed.is_killed() || self.vars.killed.is_killed() {
                warn!(start_ts = self.start_ts, key = %remaining[0], "lock wait cancelled");
                return Err(KvError::LockWaitCancelled {
                    key: remaining[0].clone(),
                });
            }

            ctx.stats.attempts += 1;
            let outcomes = self.parts.lock_client.lock_keys(LockRequest {
                keys: remaining,
                primary: &primary,
                start_ts: self.start_ts,
                for_update_ts: ctx.for_update_ts,
                wait,
                return_values: ctx.return_values,
            })?;

            let mut locked = 0;
            let mut blocked = None;
            for (key, outcome) in remaining.iter().zip(outcomes) {
                trace!(key = %key, ?outcome, "lock attempt");
                match outcome {
                    LockOutcome::Locked { value } => self.record_locked(ctx, key, value, false),
                    LockOutcome::AlreadyLocked { value } => {
                        self.record_locked(ctx, key, value, true)
                    }
                    LockOutcome::Contended { holder_start_ts } => {
                        blocked = Some(Blocked {
                            key: key.clone(),
                            holder_start_ts,
                            waited: false,
                        });
                        break;
                    }
                    LockOutcome::TimedOut { holder_start_ts } => {
                        blocked = Some(Blocked {
                            key: key.clone(),
                            holder_start_ts,
                            waited: true,
                        });
                        break;
                    }
                    LockOutcome::WriteConflict { commit_ts } => {
                        debug!(key = %key, start_ts = self.start_ts, commit_ts, "lock write conflict");
                        return Err(KvError::WriteConflict {
                            key: key.clone(),
                            start_ts: self.start_ts,
                            conflict_ts: commit_ts,
                        });
                    }
                    LockOutcome::Deadlock { holder_start_ts } => {
                        warn!(key = %key, start_ts = self.start_ts, holder_start_ts, "deadlock");
                        return Err(KvError::Deadlock {
                            key: key.clone(),
                            holder_start_ts,
                        });
                    }
                }
                locked += 1;
            }
            remaining = &remaining[locked..];

            let Some(Blocked {
                key,
                holder_start_ts,
                waited,
            }) = blocked
            else {
                if remaining.is_empty() {
                    return Ok(());
                }
                return Err(KvError::Store(format!(
                    "lock client answered {} of {} keys",
                    locked,
                    locked + remaining.len()
                )));
            };
            ctx.stats.waited = true;

            if ctx.lock_wait == LockWait::NoWait {
                debug!(key = %key, holder_start_ts, "no-wait lock failed");
                return Err(KvError::LockContention {
                    key,
                    holder_start_ts,
                });
            }
            let now = Instant::now();
            let budget = self.wait_budget(ctx, now);
            if budget.is_zero() {
                return Err(self.timeout(ctx, key, now));
            }

            // A client that did not block itself is paced here.
            if !waited && !wait.is_zero() {
                std::thread::sleep(wait);
            }

            wait = match self.parts.backoff.backoff(attempt) {
                BackoffAction::Yield => {
                    std::thread::yield_now();
                    Duration::ZERO
                }
                BackoffAction::Wait(d) => d.min(poll),
                BackoffAction::Abort => return Err(self.timeout(ctx, key, Instant::now())),
            };
            wait = wait.min(budget);
            attempt += 1;
        }
    }

    /// Current value of a key this transaction already holds, resolved without
    /// a lock request. Buffered writes win; otherwise the store is read only if
    /// the lock recorded an existing value.
    fn held_value(&self, ctx: &LockCtx, key: &Key, flags: KeyFlags) -> Result<Option<Bytes>> {
        match self.mem_buffer().lookup(key) {
            Lookup::Value(v) => Ok(Some(v)),
            Lookup::Deleted => Ok(None),
            Lookup::Missing(_) if !flags.has_locked_value_exists() => Ok(None),
            Lookup::Missing(_) => {
                let version = self.for_update_ts.max(ctx.for_update_ts);
                let value = self
                    .parts
                    .store
                    .get(key, version, self.snapshot().options())?;
                Ok(value.filter(|v| !v.is_empty()))
            }
        }
    }

    /// Time left to wait. An unbounded wait still ends with the transaction's lifetime.
    fn wait_budget(&self, ctx: &LockCtx, now: Instant) -> Duration {
        let lifetime = self
            .parts
            .config
            .max_txn_time_use()
            .saturating_sub(now.saturating_duration_since(self.start_time));
        match ctx.remaining(now) {
            Some(b) => b.min(lifetime),
            None => lifetime,
        }
    }

    fn timeout(&self, ctx: &LockCtx, key: Key, now: Instant) -> KvError {
        let waited = ctx
            .wait_start
            .map(|s| now.saturating_duration_since(s))
            .unwrap_or_default();
        warn!(start_ts = self.start_ts, key = %key, ?waited, "lock wait timeout");
        KvError::LockWaitTimeout { key, waited }
    }

    fn record_locked(&self, ctx: &mut LockCtx, key: &Key, value: Option<Bytes>, already: bool) {
        let exists = if ctx.return_values {
            value.is_some()
        } else {
            true
        };
        let exists_op = if exists {
            FlagsOp::SetKeyLockedValueExists
        } else {
            FlagsOp::SetKeyLockedValueNotExists
        };
        self.mem_buffer()
            .update_flags(key.clone(), &[FlagsOp::SetKeyLocked, exists_op]);
        ctx.values.insert(
            key.clone(),
            ReturnedValue {
                value: if ctx.return_values { value } else { None },
                already_locked: already,
            },
        );
    }
}
