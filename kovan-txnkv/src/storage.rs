use crate::backoff::{BackoffStrategy, LockWaitBackoff};
use crate::config::KvConfig;
use crate::remote::{KvStore, MemoryTracker, PessimisticLockClient};
use crate::snapshot::Snapshot;
use crate::timestamp_oracle::{LocalTimestampOracle, TimestampOracle};
use crate::txn::{Transaction, TxnParts};
use std::sync::Arc;
use tracing::debug;

/// Entry point: begins transactions and hands out snapshots over one store.
#[derive(Clone)]
pub struct TxnKv {
    parts: TxnParts,
}

impl std::fmt::Debug for TxnKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnKv")
            .field("config", &self.parts.config)
            .finish()
    }
}

impl TxnKv {
    /// Uses `store` for reads, commits and pessimistic locks, with a local
    /// timestamp oracle.
    pub fn new<S>(store: Arc<S>, config: KvConfig) -> Self
    where
        S: KvStore + PessimisticLockClient + 'static,
    {
        Self::with_parts(
            store.clone(),
            store,
            Arc::new(LocalTimestampOracle::new()),
            config,
        )
    }

    pub fn with_parts(
        store: Arc<dyn KvStore>,
        lock_client: Arc<dyn PessimisticLockClient>,
        oracle: Arc<dyn TimestampOracle>,
        config: KvConfig,
    ) -> Self {
        let backoff = Arc::new(LockWaitBackoff::new(config.lock_wait_poll()));
        Self {
            parts: TxnParts {
                store,
                lock_client,
                oracle,
                backoff,
                config: Arc::new(config),
                tracker: None,
            },
        }
    }

    /// Set a custom lock-wait backoff strategy.
    pub fn set_backoff(&mut self, backoff: Arc<dyn BackoffStrategy>) {
        self.parts.backoff = backoff;
    }

    /// Every transaction begun afterwards reports buffer sizes to `tracker`.
    pub fn set_memory_tracker(&mut self, tracker: Arc<dyn MemoryTracker>) {
        self.parts.tracker = Some(tracker);
    }

    pub fn begin(&self) -> Transaction {
        self.begin_with_start_ts(self.parts.oracle.get_timestamp())
    }

    /// Begins a transaction reading at `start_ts`, e.g. for a stale read.
    pub fn begin_with_start_ts(&self, start_ts: u64) -> Transaction {
        let txn = Transaction::new(self.parts.clone(), start_ts);
        debug!(txn_id = txn.txn_id(), start_ts, "transaction begun");
        txn
    }

    pub fn get_snapshot(&self, version: u64) -> Snapshot {
        Snapshot::new(
            Arc::clone(&self.parts.store),
            version,
            self.parts.config.scan_batch_size,
        )
    }

    /// A fresh timestamp: every commit finished before this call is visible
    /// to a snapshot at the returned version.
    pub fn current_version(&self) -> u64 {
        self.parts.oracle.get_timestamp()
    }

    pub fn oracle(&self) -> &Arc<dyn TimestampOracle> {
        &self.parts.oracle
    }

    pub fn config(&self) -> &KvConfig {
        &self.parts.config
    }
}
