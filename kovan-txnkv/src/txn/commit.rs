use super::{Transaction, TxnState};
use crate::error::{KvError, Result};
use crate::key::Key;
use crate::remote::{CommitRequest, Mutation, Op};
use tracing::{debug, warn};

impl Transaction {
    /// The buffer's merged view as commit mutations, in key order.
    ///
    /// Untouched and 2PC-ignored keys are left out. Lock-only keys, and
    /// flags-only keys holding a pessimistic lock, become `Op::Lock` so the
    /// store checks and releases them. A tombstone on a key presumed absent
    /// and never locked has nothing to undo and is dropped.
    pub(crate) fn collect_mutations(&self) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(self.len());
        for entry in self.mem_buffer().iter_with_flags(&Key::default(), None) {
            let flags = entry.flags();
            if flags.skipped_at_commit() {
                continue;
            }
            let op = if !entry.has_value() {
                if flags.has_lock_only() || flags.has_locked() {
                    Op::Lock
                } else {
                    continue;
                }
            } else if flags.has_lock_only() {
                Op::Lock
            } else if entry.is_tombstone() {
                if flags.has_presume_key_not_exists() && !flags.has_locked() {
                    continue;
                }
                Op::Delete
            } else {
                match entry.value() {
                    Some(v) => Op::Put(v.clone()),
                    None => continue,
                }
            };
            mutations.push(Mutation {
                key: entry.key().clone(),
                op,
            });
        }
        mutations
    }

    /// Applies every buffered mutation atomically.
    ///
    /// Returns the commit timestamp, or the start timestamp when there was
    /// nothing to write. After this returns the transaction is terminal: on
    /// failure it is rolled back and its pessimistic locks are released.
    pub fn commit(&mut self) -> Result<u64> {
        self.check_valid()?;

        let elapsed = self.start_time.elapsed();
        let limit = self.parts.config.max_txn_time_use();
        if elapsed > limit {
            warn!(start_ts = self.start_ts, ?elapsed, "transaction too old to commit");
            self.abort_after_failure();
            return Err(KvError::TxnTooOld {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: limit.as_millis() as u64,
            });
        }

        let mutations = self.collect_mutations();
        if mutations.is_empty() {
            self.state = TxnState::Committed;
            debug!(txn_id = self.txn_id, start_ts = self.start_ts, "read-only commit");
            self.run_commit_hooks(self.start_ts);
            return Ok(self.start_ts);
        }

        let primary = self
            .primary
            .as_ref()
            .filter(|p| mutations.iter().any(|m| &m.key == *p))
            .unwrap_or(&mutations[0].key)
            .clone();
        let commit_ts = self.parts.oracle.get_timestamp();
        let count = mutations.len();
        let req = CommitRequest {
            mutations,
            primary,
            start_ts: self.start_ts,
            commit_ts,
            sync_log: self.options.sync_log(),
        };

        match self.parts.store.commit(req) {
            Ok(()) => {
                self.state = TxnState::Committed;
                self.commit_ts = Some(commit_ts);
                debug!(
                    txn_id = self.txn_id,
                    start_ts = self.start_ts,
                    commit_ts,
                    mutations = count,
                    "transaction committed"
                );
                self.run_commit_hooks(commit_ts);
                Ok(commit_ts)
            }
            Err(e) => {
                warn!(txn_id = self.txn_id, start_ts = self.start_ts, error = %e, "commit failed");
                self.abort_after_failure();
                Err(e)
            }
        }
    }

    /// Discards the buffer and releases pessimistic locks. Local writes never
    /// reached the store, so nothing else is undone remotely.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_valid()?;
        debug!(txn_id = self.txn_id, start_ts = self.start_ts, "transaction rolled back");
        self.finish_rollback().inspect_err(|e| {
            warn!(start_ts = self.start_ts, error = %e, "pessimistic rollback failed");
        })
    }

    /// Rolls back after a failed commit; a lock release failure is only logged.
    fn abort_after_failure(&mut self) {
        if let Err(e) = self.finish_rollback() {
            warn!(start_ts = self.start_ts, error = %e, "pessimistic rollback after failed commit failed");
        }
    }

    fn finish_rollback(&mut self) -> Result<()> {
        let locked: Vec<Key> = self
            .mem_buffer()
            .iter_with_flags(&Key::default(), None)
            .filter(|e| e.flags().has_locked())
            .map(|e| e.key().clone())
            .collect();
        self.state = TxnState::RolledBack;
        self.commit_hooks.clear();
        self.mem_buffer().reset();
        if locked.is_empty() {
            return Ok(());
        }
        self.parts
            .lock_client
            .pessimistic_rollback(&locked, self.start_ts, self.for_update_ts)
    }

    fn run_commit_hooks(&mut self, ts: u64) {
        for hook in self.commit_hooks.drain(..) {
            hook(ts);
        }
    }
}
