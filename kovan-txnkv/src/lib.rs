#![doc(
    html_logo_url = "https://raw.githubusercontent.com/vertexclique/kovan/master/art/kovan-square.svg"
)]
//! # Kovan TxnKV
//!
//! `kovan-txnkv` is the client half of a Percolator-style transactional key-value store:
//! a staged write buffer, snapshot reads, pessimistic locking and commit.
//!
//! ## How it works
//!
//! A [`Transaction`] owns a [`MemBuffer`] and a [`Snapshot`] fixed at its start timestamp.
//!
//! - **Reads** consult the buffer first and fall through to the snapshot on a miss.
//!   Buffered tombstones hide remote values.
//! - **Writes** land only in the buffer. The buffer is a stack of staging layers that
//!   can be released into their parent or discarded as a unit.
//! - **Locks** are taken through a [`PessimisticLockClient`] with no-wait, bounded or
//!   unbounded waits, cancellable through a [`KillSignal`].
//! - **Commit** sends the buffer's merged view to the [`KvStore`] atomically.
//!
//! ## Example
//!
//! ```rust
//! use kovan_txnkv::{Key, KvConfig, MockStore, TxnKv};
//! use std::sync::Arc;
//!
//! let kv = TxnKv::new(Arc::new(MockStore::new()), KvConfig::default());
//!
//! // 1. Write a value
//! let mut txn = kv.begin();
//! txn.set("key1", "value1").unwrap();
//! txn.commit().unwrap();
//!
//! // 2. Read the value
//! let txn = kv.begin();
//! let val = txn.get(&Key::from("key1")).expect("Should find key");
//! assert_eq!(val, "value1");
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod flags;
pub mod key;
pub mod kv;
pub mod lock_ctx;
pub mod membuffer;
pub mod mockstore;
pub mod options;
pub mod remote;
pub mod snapshot;
mod storage;
mod timestamp_oracle;
pub mod txn;

pub use crate::backoff::{BackoffAction, BackoffStrategy, LockWaitBackoff};
pub use crate::config::{BufferLimits, KvConfig};
pub use crate::error::{KvError, Result};
pub use crate::flags::{FlagsOp, KeyFlags};
pub use crate::key::{Key, KeyRange};
pub use crate::kv::{BatchGetter, Getter, Mutator, Retriever};
pub use crate::lock_ctx::{KillSignal, LockCtx, LockKeysStats, LockWait, ReturnedValue};
pub use crate::membuffer::{
    Lookup, MemBuffer, MemBufferEntry, MemBufferSnapshot, MemKeyHandle, StagingHandle,
};
pub use crate::mockstore::MockStore;
pub use crate::options::{IsoLevel, Priority, ReplicaReadType, TxnOption, TxnOptionKey};
pub use crate::remote::{KvStore, MemoryTracker, PessimisticLockClient};
pub use crate::snapshot::Snapshot;
pub use crate::storage::TxnKv;
pub use crate::timestamp_oracle::{LocalTimestampOracle, TimestampOracle};
pub use crate::txn::{Transaction, TxnState, Variables};
