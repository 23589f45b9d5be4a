//! An in-process Percolator-style store.
//!
//! Keeps CF_LOCK (pessimistic locks), CF_WRITE (commit records) and CF_DATA
//! (values) in memory and implements [`KvStore`] and [`PessimisticLockClient`]
//! with the semantics a cluster would expose: locks block other lockers and
//! committers, writes newer than a for-update timestamp are conflicts, and a
//! commit applies all of its mutations or none.

mod lock_table;
mod mvcc;

pub use lock_table::{LockInfo, LockTable};
pub use mvcc::{WriteInfo, WriteKind};

use crate::error::{KvError, Result};
use crate::key::Key;
use crate::remote::{
    CommitRequest, KvStore, LockOutcome, LockRequest, Op, PessimisticLockClient, ReadOptions,
    ScanRequest,
};
use bytes::Bytes;
use mvcc::Columns;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

struct Inner {
    columns: Columns,
    /// waiter start_ts -> holder start_ts
    wait_for: HashMap<u64, u64>,
}

pub struct MockStore {
    locks: LockTable,
    inner: Mutex<Inner>,
    /// Signalled whenever a lock is released.
    released: Condvar,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            locks: LockTable::new(),
            inner: Mutex::new(Inner {
                columns: Columns::default(),
                wait_for: HashMap::new(),
            }),
            released: Condvar::new(),
        }
    }

    pub fn lock_info(&self, key: &Key) -> Option<LockInfo> {
        self.locks.get_lock(key)
    }

    /// Newest non-rollback commit record of `key`.
    pub fn latest_commit(&self, key: &Key) -> Option<(u64, WriteInfo)> {
        self.inner.lock().columns.latest_commit(key)
    }

    /// Test hook: makes `holder_start_ts` hold a pessimistic lock on `key`.
    pub fn lock_as(&self, key: impl Into<Key>, holder_start_ts: u64) {
        let key = key.into();
        let _inner = self.inner.lock();
        self.locks.unlock(&key);
        let _ = self.locks.try_lock(
            &key,
            LockInfo {
                primary: key.clone(),
                start_ts: holder_start_ts,
                for_update_ts: holder_start_ts,
            },
        );
    }

    /// Test hook: drops whatever lock `key` has and wakes waiters.
    pub fn release(&self, key: &Key) -> Option<LockInfo> {
        let mut inner = self.inner.lock();
        let released = self.locks.unlock(key);
        if let Some(lock) = &released {
            inner.wait_for.retain(|_, holder| *holder != lock.start_ts);
        }
        drop(inner);
        self.released.notify_all();
        released
    }

    /// Whether `holder` transitively waits for `waiter`.
    fn would_deadlock(inner: &Inner, waiter: u64, holder: u64) -> bool {
        let mut cur = holder;
        for _ in 0..=inner.wait_for.len() {
            if cur == waiter {
                return true;
            }
            match inner.wait_for.get(&cur) {
                Some(next) => cur = *next,
                None => return false,
            }
        }
        false
    }

    fn lock_one(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        key: &Key,
        req: &LockRequest<'_>,
        deadline: Instant,
    ) -> LockOutcome {
        loop {
            let lock = LockInfo {
                primary: req.primary.clone(),
                start_ts: req.start_ts,
                for_update_ts: req.for_update_ts,
            };
            let value = || {
                if req.return_values {
                    inner.columns.read(key, u64::MAX)
                } else {
                    None
                }
            };
            let holder = match self.locks.get_lock(key) {
                Some(held) if held.start_ts == req.start_ts => {
                    let _ = self.locks.try_lock(key, lock);
                    return LockOutcome::AlreadyLocked { value: value() };
                }
                Some(held) => held.start_ts,
                None => {
                    if let Some((commit_ts, _)) = inner.columns.latest_commit(key)
                        && commit_ts > req.for_update_ts
                    {
                        return LockOutcome::WriteConflict { commit_ts };
                    }
                    let value = value();
                    if let Err(held) = self.locks.try_lock(key, lock) {
                        trace!(key = %key, holder = held.start_ts, "lost lock race");
                        continue;
                    }
                    return LockOutcome::Locked { value };
                }
            };

            if Self::would_deadlock(&**inner, req.start_ts, holder) {
                return LockOutcome::Deadlock {
                    holder_start_ts: holder,
                };
            }
            if req.wait.is_zero() {
                return LockOutcome::Contended {
                    holder_start_ts: holder,
                };
            }
            if Instant::now() >= deadline {
                return LockOutcome::TimedOut {
                    holder_start_ts: holder,
                };
            }
            inner.wait_for.insert(req.start_ts, holder);
            self.released.wait_until(inner, deadline);
            inner.wait_for.remove(&req.start_ts);
        }
    }
}

impl KvStore for MockStore {
    fn get(&self, key: &Key, version: u64, _opts: &ReadOptions) -> Result<Option<Bytes>> {
        Ok(self.inner.lock().columns.read(key, version))
    }

    fn batch_get(
        &self,
        keys: &[Key],
        version: u64,
        _opts: &ReadOptions,
    ) -> Result<HashMap<Key, Bytes>> {
        let inner = self.inner.lock();
        Ok(keys
            .iter()
            .filter_map(|k| inner.columns.read(k, version).map(|v| (k.clone(), v)))
            .collect())
    }

    fn scan(&self, req: ScanRequest<'_>, opts: &ReadOptions) -> Result<Vec<(Key, Bytes)>> {
        let inner = self.inner.lock();
        Ok(inner.columns.scan(
            req.lower,
            req.upper,
            req.limit,
            req.reverse,
            req.version,
            req.skip,
            opts.sample_step as usize,
        ))
    }

    fn commit(&self, req: CommitRequest) -> Result<()> {
        if req.commit_ts <= req.start_ts {
            return Err(KvError::Store(format!(
                "commit_ts {} must be greater than start_ts {}",
                req.commit_ts, req.start_ts
            )));
        }
        let mut inner = self.inner.lock();

        // Check every key before touching anything.
        for m in &req.mutations {
            match self.locks.get_lock(&m.key) {
                Some(held) if held.start_ts == req.start_ts => {}
                Some(held) => {
                    return Err(KvError::LockContention {
                        key: m.key.clone(),
                        holder_start_ts: held.start_ts,
                    });
                }
                None => {
                    if let Some((commit_ts, _)) = inner.columns.latest_commit(&m.key)
                        && commit_ts > req.start_ts
                    {
                        return Err(KvError::WriteConflict {
                            key: m.key.clone(),
                            start_ts: req.start_ts,
                            conflict_ts: commit_ts,
                        });
                    }
                }
            }
        }

        for m in req.mutations {
            let kind = match m.op {
                Op::Put(value) => {
                    inner.columns.put_data(&m.key, req.start_ts, value);
                    WriteKind::Put
                }
                Op::Delete => WriteKind::Delete,
                Op::Lock => WriteKind::Lock,
            };
            inner.columns.put_write(
                &m.key,
                req.commit_ts,
                WriteInfo {
                    start_ts: req.start_ts,
                    kind,
                },
            );
            self.locks.unlock_if_owner(&m.key, req.start_ts);
        }
        inner.wait_for.retain(|_, holder| *holder != req.start_ts);
        drop(inner);
        self.released.notify_all();
        debug!(
            start_ts = req.start_ts,
            commit_ts = req.commit_ts,
            primary = %req.primary,
            "mock store committed"
        );
        Ok(())
    }
}

impl PessimisticLockClient for MockStore {
    fn lock_keys(&self, req: LockRequest<'_>) -> Result<Vec<LockOutcome>> {
        let deadline = Instant::now() + req.wait;
        let mut inner = self.inner.lock();
        let mut outcomes = Vec::with_capacity(req.keys.len());
        for key in req.keys {
            let outcome = self.lock_one(&mut inner, key, &req, deadline);
            let failed = !matches!(
                outcome,
                LockOutcome::Locked { .. } | LockOutcome::AlreadyLocked { .. }
            );
            outcomes.push(outcome);
            if failed {
                break;
            }
        }
        Ok(outcomes)
    }

    fn pessimistic_rollback(&self, keys: &[Key], start_ts: u64, _for_update_ts: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut released = 0;
        for key in keys {
            if self.locks.unlock_if_owner(key, start_ts) {
                released += 1;
            }
        }
        inner.wait_for.retain(|_, holder| *holder != start_ts);
        drop(inner);
        if released > 0 {
            self.released.notify_all();
        }
        debug!(start_ts, released, "mock store pessimistic rollback");
        Ok(())
    }
}
