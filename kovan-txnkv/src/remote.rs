//! Collaborators outside this crate: the versioned store, its pessimistic
//! lock service, and memory accounting.
//!
//! [`crate::mockstore::MockStore`] implements both store traits in process.

use crate::error::Result;
use crate::key::Key;
use crate::options::SnapshotOptions;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// Receives byte-count deltas from a [`crate::MemBuffer`]. Never rejects.
pub trait MemoryTracker: Send + Sync {
    fn consume(&self, bytes: i64);
}

/// Options forwarded with every read.
pub type ReadOptions = SnapshotOptions;

/// One page of a scan.
///
/// Covers `[lower, upper)`; `upper == None` is unbounded. A reverse scan walks
/// the same range from the top down.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    pub lower: &'a Key,
    pub upper: Option<&'a Key>,
    pub limit: usize,
    pub reverse: bool,
    pub version: u64,
    /// Visible keys passed over before the first sampled one.
    pub skip: usize,
}

/// Read and commit access to a versioned key-value store.
pub trait KvStore: Send + Sync {
    /// The value visible at `version`, `None` if absent or deleted.
    fn get(&self, key: &Key, version: u64, opts: &ReadOptions) -> Result<Option<Bytes>>;

    /// Only keys that exist at `version` appear in the result.
    fn batch_get(
        &self,
        keys: &[Key],
        version: u64,
        opts: &ReadOptions,
    ) -> Result<HashMap<Key, Bytes>>;

    /// At most `req.limit` visible pairs, in scan order.
    fn scan(&self, req: ScanRequest<'_>, opts: &ReadOptions) -> Result<Vec<(Key, Bytes)>>;

    /// Applies every mutation atomically or none of them.
    fn commit(&self, req: CommitRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put(Bytes),
    Delete,
    /// Checks and releases the key's lock without writing a value.
    Lock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub key: Key,
    pub op: Op,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub mutations: Vec<Mutation>,
    pub primary: Key,
    pub start_ts: u64,
    pub commit_ts: u64,
    pub sync_log: bool,
}

/// One attempt to acquire pessimistic locks.
#[derive(Debug, Clone, Copy)]
pub struct LockRequest<'a> {
    pub keys: &'a [Key],
    pub primary: &'a Key,
    pub start_ts: u64,
    pub for_update_ts: u64,
    /// How long the service may block on a contended key before answering.
    pub wait: Duration,
    pub return_values: bool,
}

/// Per-key result of a [`LockRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// Newly locked. `value` is filled when values were requested.
    Locked { value: Option<Bytes> },
    /// Already held by the requesting transaction.
    AlreadyLocked { value: Option<Bytes> },
    /// Held by another transaction; nothing was waited for.
    Contended { holder_start_ts: u64 },
    /// Still held by another transaction after waiting `LockRequest::wait`.
    TimedOut { holder_start_ts: u64 },
    /// A newer commit than the for-update timestamp exists.
    WriteConflict { commit_ts: u64 },
    Deadlock { holder_start_ts: u64 },
}

pub trait PessimisticLockClient: Send + Sync {
    /// Returns outcomes in request order. The service stops at the first key
    /// it could not lock, so the result may cover only a prefix of the keys;
    /// every key before the failing one was locked.
    fn lock_keys(&self, req: LockRequest<'_>) -> Result<Vec<LockOutcome>>;

    /// Releases pessimistic locks held by `start_ts` on `keys`.
    fn pessimistic_rollback(&self, keys: &[Key], start_ts: u64, for_update_ts: u64)
        -> Result<()>;
}
