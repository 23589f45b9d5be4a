use crate::key::Key;
use crate::options::TxnOptionKey;
use crate::txn::TxnState;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for `Result<T, KvError>`.
pub type Result<T> = std::result::Result<T, KvError>;

/// Recoverable errors surfaced by the buffer, snapshot and transaction layers.
///
/// Caller logic errors (stale staging handles, value access after
/// `discard_values`) are not represented here: they panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The key has no value in the consulted view.
    #[error("key not exist")]
    NotExist,

    /// `set` was called with an empty value; use `delete` instead.
    #[error("can not set nil value")]
    CannotSetNilValue,

    #[error("entry too large, the max entry size is {limit}, the size of data is {size}")]
    EntryTooLarge { size: u64, limit: u64 },

    #[error("transaction is too large, size: {size}, limit: {limit}")]
    TxnTooLarge { size: u64, limit: u64 },

    /// A no-wait lock attempt found the key locked by another transaction.
    #[error("lock on key {key} is held by txn {holder_start_ts}, no-wait lock failed")]
    LockContention { key: Key, holder_start_ts: u64 },

    /// The lock-wait budget ran out.
    #[error("lock wait timeout on key {key} after {waited:?}")]
    LockWaitTimeout { key: Key, waited: Duration },

    /// The kill signal was observed while waiting for a lock.
    #[error("lock wait on key {key} cancelled by kill signal")]
    LockWaitCancelled { key: Key },

    /// The transaction is no longer active.
    #[error("invalid transaction: state is {state:?}")]
    InvalidTxn { state: TxnState },

    #[error("write conflict on key {key}, txn start_ts {start_ts}, conflict commit_ts {conflict_ts}")]
    WriteConflict {
        key: Key,
        start_ts: u64,
        conflict_ts: u64,
    },

    #[error("deadlock detected waiting for key {key} held by txn {holder_start_ts}")]
    Deadlock { key: Key, holder_start_ts: u64 },

    #[error("transaction exceeded max time use: {elapsed_ms}ms > {limit_ms}ms")]
    TxnTooOld { elapsed_ms: u64, limit_ms: u64 },

    #[error("option {0:?} is not supported here")]
    UnsupportedOption(TxnOptionKey),

    /// Failure reported by the remote store client.
    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotExist)
    }

    /// Errors after which the same request may succeed if retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::LockContention { .. }
                | KvError::LockWaitTimeout { .. }
                | KvError::WriteConflict { .. }
                | KvError::Deadlock { .. }
        )
    }

    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            KvError::LockContention { .. }
                | KvError::LockWaitTimeout { .. }
                | KvError::LockWaitCancelled { .. }
                | KvError::Deadlock { .. }
        )
    }
}
