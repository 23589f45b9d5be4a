//! Transactions: a [`MemBuffer`] over a [`Snapshot`], an option bag, the
//! pessimistic locking protocol and commit/rollback.

mod commit;
mod lock_keys;
mod union;

pub use union::{UnionIter, UnionStore};

use crate::backoff::BackoffStrategy;
use crate::config::KvConfig;
use crate::error::{KvError, Result};
use crate::flags::FlagsOp;
use crate::key::Key;
use crate::kv::{BatchGetter, BoxKvIter, Getter, Mutator, Retriever};
use crate::lock_ctx::KillSignal;
use crate::membuffer::MemBuffer;
use crate::options::{SnapshotSupport, TxnOption, TxnOptionKey, TxnOptions};
use crate::remote::{KvStore, PessimisticLockClient};
use crate::snapshot::Snapshot;
use crate::timestamp_oracle::TimestampOracle;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a transaction. Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// Session-scoped settings shared by the transactions of one session.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    /// Killing the session cancels any lock wait of its transactions.
    pub killed: KillSignal,
}

type CommitHook = Box<dyn FnOnce(u64) + Send>;

/// Collaborators a transaction is built from; handed out by [`crate::TxnKv`].
#[derive(Clone)]
pub(crate) struct TxnParts {
    pub(crate) store: Arc<dyn KvStore>,
    pub(crate) lock_client: Arc<dyn PessimisticLockClient>,
    pub(crate) oracle: Arc<dyn TimestampOracle>,
    pub(crate) backoff: Arc<dyn BackoffStrategy>,
    pub(crate) config: Arc<KvConfig>,
    pub(crate) tracker: Option<Arc<dyn crate::remote::MemoryTracker>>,
}

/// A transaction over the remote store. Not safe for concurrent use.
///
/// Reads see the transaction's own writes first, then the snapshot at
/// `start_ts`. Writes only touch the local buffer until [`Transaction::commit`].
pub struct Transaction {
    txn_id: u128,
    start_ts: u64,
    start_time: Instant,
    state: TxnState,
    us: UnionStore,
    options: TxnOptions,
    vars: Arc<Variables>,
    parts: TxnParts,
    /// First key written or locked.
    primary: Option<Key>,
    /// Highest for-update timestamp used by a pessimistic lock.
    for_update_ts: u64,
    commit_ts: Option<u64>,
    commit_hooks: Vec<CommitHook>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("start_ts", &self.start_ts)
            .field("state", &self.state)
            .field("len", &self.us.mem_buffer().len())
            .finish()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[txn] startTS: {}", self.start_ts)
    }
}

impl Transaction {
    pub(crate) fn new(parts: TxnParts, start_ts: u64) -> Self {
        let buffer = MemBuffer::new(parts.config.buffer_limits());
        if let Some(tracker) = &parts.tracker {
            buffer.set_memory_tracker(Arc::clone(tracker));
        }
        let snapshot = Snapshot::new(
            Arc::clone(&parts.store),
            start_ts,
            parts.config.scan_batch_size,
        );
        Self {
            txn_id: uuid::Uuid::new_v4().as_u128(),
            start_ts,
            start_time: Instant::now(),
            state: TxnState::Active,
            us: UnionStore::new(buffer, snapshot),
            options: TxnOptions::default(),
            vars: Arc::new(Variables::default()),
            parts,
            primary: None,
            for_update_ts: start_ts,
            commit_ts: None,
            commit_hooks: Vec::new(),
        }
    }

    pub fn txn_id(&self) -> u128 {
        self.txn_id
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    /// Set once the transaction committed at least one mutation.
    pub fn commit_ts(&self) -> Option<u64> {
        self.commit_ts
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// False once committed or rolled back.
    pub fn valid(&self) -> bool {
        self.state == TxnState::Active
    }

    fn check_valid(&self) -> Result<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(KvError::InvalidTxn { state: self.state })
        }
    }

    /// Nothing was written or locked.
    pub fn is_read_only(&self) -> bool {
        self.primary.is_none()
    }

    pub fn is_pessimistic(&self) -> bool {
        self.options.pessimistic()
    }

    pub fn len(&self) -> usize {
        self.us.mem_buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.us.mem_buffer().is_empty()
    }

    pub fn size(&self) -> usize {
        self.us.mem_buffer().size()
    }

    /// Drops every buffered write. The transaction stays active.
    pub fn reset(&mut self) {
        self.us.mem_buffer().reset();
        self.primary = None;
    }

    pub fn set_vars(&mut self, vars: Arc<Variables>) {
        self.vars = vars;
    }

    pub fn vars(&self) -> &Arc<Variables> {
        &self.vars
    }

    pub fn mem_buffer(&self) -> &MemBuffer {
        self.us.mem_buffer()
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.us.snapshot()
    }

    pub fn union_store(&self) -> &UnionStore {
        &self.us
    }

    pub fn options(&self) -> &TxnOptions {
        &self.options
    }

    /// Stores `opt` and forwards it to the snapshot when the snapshot reads it.
    ///
    /// `SnapshotTs` is rejected: a transaction's read version is fixed at begin.
    pub fn set_option(&mut self, opt: TxnOption) -> Result<()> {
        let key = opt.key();
        if key == TxnOptionKey::SnapshotTs {
            return Err(KvError::UnsupportedOption(key));
        }
        if key.snapshot_support() == SnapshotSupport::Supported {
            self.us.snapshot_mut().set_option(opt)?;
        }
        self.options.set(opt);
        Ok(())
    }

    pub fn del_option(&mut self, key: TxnOptionKey) {
        self.options.del(key);
        self.us.snapshot_mut().del_option(key);
    }

    /// Registers `hook` to run with the commit timestamp after a successful commit.
    pub fn on_commit(&mut self, hook: impl FnOnce(u64) + Send + 'static) {
        self.commit_hooks.push(Box::new(hook));
    }

    pub fn get(&self, key: &Key) -> Result<Bytes> {
        self.check_valid()?;
        self.us.get(key)
    }

    /// Buffered values and tombstones take precedence over the snapshot.
    /// Keys without a value are absent from the result.
    pub fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>> {
        self.check_valid()?;
        self.us.batch_get(keys)
    }

    pub fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<UnionIter<'_>> {
        self.check_valid()?;
        Ok(self.us.iter(start, upper_bound))
    }

    pub fn iter_reverse(&self, start: Option<&Key>) -> Result<UnionIter<'_>> {
        self.check_valid()?;
        Ok(self.us.iter_reverse(start))
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Bytes>) -> Result<()> {
        self.set_with_flags(key, value, &[])
    }

    pub fn set_with_flags(
        &mut self,
        key: impl Into<Key>,
        value: impl Into<Bytes>,
        ops: &[FlagsOp],
    ) -> Result<()> {
        self.check_valid()?;
        let key = key.into();
        self.us
            .mem_buffer()
            .set_with_flags(key.clone(), value, ops)?;
        self.primary.get_or_insert(key);
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<Key>) -> Result<()> {
        self.check_valid()?;
        let key = key.into();
        self.us.mem_buffer().delete(key.clone())?;
        self.primary.get_or_insert(key);
        Ok(())
    }
}

impl Getter for Transaction {
    fn get(&self, key: &Key) -> Result<Bytes> {
        Transaction::get(self, key)
    }
}

impl BatchGetter for Transaction {
    fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>> {
        Transaction::batch_get(self, keys)
    }
}

impl Retriever for Transaction {
    fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(Transaction::iter(self, start, upper_bound)?))
    }

    fn iter_reverse(&self, start: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(Transaction::iter_reverse(self, start)?))
    }
}

impl Mutator for Transaction {
    fn set(&mut self, key: Key, value: Bytes) -> Result<()> {
        Transaction::set(self, key, value)
    }

    fn delete(&mut self, key: Key) -> Result<()> {
        Transaction::delete(self, key)
    }
}
