//! Typed per-transaction and per-snapshot options.
//!
//! Options are set one at a time through [`TxnOption`] and stored in a struct
//! of optional fields; an unset field reads as its documented default.

use crate::error::{KvError, Result};

/// Transaction isolation level. Defaults to snapshot isolation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IsoLevel {
    /// Snapshot isolation.
    #[default]
    Si,
    /// Read committed.
    Rc,
}

/// Which replicas a read may be served from. Defaults to the leader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReplicaReadType {
    #[default]
    Leader,
    Follower,
    /// Leader, followers and learners.
    Mixed,
}

impl ReplicaReadType {
    pub fn is_follower_read(self) -> bool {
        self != ReplicaReadType::Leader
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    #[default]
    Normal,
    Low,
    High,
}

/// Names a [`TxnOption`] independently of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnOptionKey {
    IsolationLevel,
    Priority,
    NotFillCache,
    SyncLog,
    KeyOnly,
    Pessimistic,
    SnapshotTs,
    ReplicaRead,
    TaskId,
    CollectRuntimeStats,
    SampleStep,
}

/// How a snapshot treats an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSupport {
    /// Stored and forwarded with every read.
    Supported,
    /// Accepted and dropped.
    Ignored,
    /// Fails with [`KvError::UnsupportedOption`].
    Rejected,
}

impl TxnOptionKey {
    pub fn snapshot_support(self) -> SnapshotSupport {
        match self {
            TxnOptionKey::IsolationLevel
            | TxnOptionKey::Priority
            | TxnOptionKey::NotFillCache
            | TxnOptionKey::KeyOnly
            | TxnOptionKey::ReplicaRead
            | TxnOptionKey::TaskId
            | TxnOptionKey::SampleStep => SnapshotSupport::Supported,
            TxnOptionKey::SyncLog
            | TxnOptionKey::Pessimistic
            | TxnOptionKey::CollectRuntimeStats => SnapshotSupport::Ignored,
            // A snapshot's version is fixed when it is created.
            TxnOptionKey::SnapshotTs => SnapshotSupport::Rejected,
        }
    }
}

/// An option together with its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOption {
    IsolationLevel(IsoLevel),
    Priority(Priority),
    NotFillCache(bool),
    /// Whether the store must sync its write-ahead log before acking the commit.
    SyncLog(bool),
    KeyOnly(bool),
    Pessimistic(bool),
    SnapshotTs(u64),
    ReplicaRead(ReplicaReadType),
    TaskId(u64),
    CollectRuntimeStats(bool),
    /// Scans return every `n`th visible key, counted across scan pages.
    SampleStep(u32),
}

impl TxnOption {
    pub fn key(&self) -> TxnOptionKey {
        match self {
            TxnOption::IsolationLevel(_) => TxnOptionKey::IsolationLevel,
            TxnOption::Priority(_) => TxnOptionKey::Priority,
            TxnOption::NotFillCache(_) => TxnOptionKey::NotFillCache,
            TxnOption::SyncLog(_) => TxnOptionKey::SyncLog,
            TxnOption::KeyOnly(_) => TxnOptionKey::KeyOnly,
            TxnOption::Pessimistic(_) => TxnOptionKey::Pessimistic,
            TxnOption::SnapshotTs(_) => TxnOptionKey::SnapshotTs,
            TxnOption::ReplicaRead(_) => TxnOptionKey::ReplicaRead,
            TxnOption::TaskId(_) => TxnOptionKey::TaskId,
            TxnOption::CollectRuntimeStats(_) => TxnOptionKey::CollectRuntimeStats,
            TxnOption::SampleStep(_) => TxnOptionKey::SampleStep,
        }
    }
}

/// Option bag of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnOptions {
    isolation_level: Option<IsoLevel>,
    priority: Option<Priority>,
    not_fill_cache: Option<bool>,
    sync_log: Option<bool>,
    key_only: Option<bool>,
    pessimistic: Option<bool>,
    snapshot_ts: Option<u64>,
    replica_read: Option<ReplicaReadType>,
    task_id: Option<u64>,
    collect_runtime_stats: Option<bool>,
    sample_step: Option<u32>,
}

impl TxnOptions {
    pub fn set(&mut self, opt: TxnOption) {
        match opt {
            TxnOption::IsolationLevel(v) => self.isolation_level = Some(v),
            TxnOption::Priority(v) => self.priority = Some(v),
            TxnOption::NotFillCache(v) => self.not_fill_cache = Some(v),
            TxnOption::SyncLog(v) => self.sync_log = Some(v),
            TxnOption::KeyOnly(v) => self.key_only = Some(v),
            TxnOption::Pessimistic(v) => self.pessimistic = Some(v),
            TxnOption::SnapshotTs(v) => self.snapshot_ts = Some(v),
            TxnOption::ReplicaRead(v) => self.replica_read = Some(v),
            TxnOption::TaskId(v) => self.task_id = Some(v),
            TxnOption::CollectRuntimeStats(v) => self.collect_runtime_stats = Some(v),
            TxnOption::SampleStep(v) => self.sample_step = Some(v),
        }
    }

    /// Reverts `key` to its default.
    pub fn del(&mut self, key: TxnOptionKey) {
        match key {
            TxnOptionKey::IsolationLevel => self.isolation_level = None,
            TxnOptionKey::Priority => self.priority = None,
            TxnOptionKey::NotFillCache => self.not_fill_cache = None,
            TxnOptionKey::SyncLog => self.sync_log = None,
            TxnOptionKey::KeyOnly => self.key_only = None,
            TxnOptionKey::Pessimistic => self.pessimistic = None,
            TxnOptionKey::SnapshotTs => self.snapshot_ts = None,
            TxnOptionKey::ReplicaRead => self.replica_read = None,
            TxnOptionKey::TaskId => self.task_id = None,
            TxnOptionKey::CollectRuntimeStats => self.collect_runtime_stats = None,
            TxnOptionKey::SampleStep => self.sample_step = None,
        }
    }

    /// The explicitly set value of `key`, if any.
    pub fn get(&self, key: TxnOptionKey) -> Option<TxnOption> {
        match key {
            TxnOptionKey::IsolationLevel => self.isolation_level.map(TxnOption::IsolationLevel),
            TxnOptionKey::Priority => self.priority.map(TxnOption::Priority),
            TxnOptionKey::NotFillCache => self.not_fill_cache.map(TxnOption::NotFillCache),
            TxnOptionKey::SyncLog => self.sync_log.map(TxnOption::SyncLog),
            TxnOptionKey::KeyOnly => self.key_only.map(TxnOption::KeyOnly),
            TxnOptionKey::Pessimistic => self.pessimistic.map(TxnOption::Pessimistic),
            TxnOptionKey::SnapshotTs => self.snapshot_ts.map(TxnOption::SnapshotTs),
            TxnOptionKey::ReplicaRead => self.replica_read.map(TxnOption::ReplicaRead),
            TxnOptionKey::TaskId => self.task_id.map(TxnOption::TaskId),
            TxnOptionKey::CollectRuntimeStats => {
                self.collect_runtime_stats.map(TxnOption::CollectRuntimeStats)
            }
            TxnOptionKey::SampleStep => self.sample_step.map(TxnOption::SampleStep),
        }
    }

    pub fn isolation_level(&self) -> IsoLevel {
        self.isolation_level.unwrap_or_default()
    }

    pub fn priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }

    pub fn sync_log(&self) -> bool {
        self.sync_log.unwrap_or(false)
    }

    pub fn pessimistic(&self) -> bool {
        self.pessimistic.unwrap_or(false)
    }

    pub fn snapshot_ts(&self) -> Option<u64> {
        self.snapshot_ts
    }

    pub fn replica_read(&self) -> ReplicaReadType {
        self.replica_read.unwrap_or_default()
    }

    pub fn collect_runtime_stats(&self) -> bool {
        self.collect_runtime_stats.unwrap_or(false)
    }
}

/// The options a snapshot forwards with every read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    pub isolation_level: IsoLevel,
    pub priority: Priority,
    pub not_fill_cache: bool,
    pub key_only: bool,
    pub replica_read: ReplicaReadType,
    pub task_id: u64,
    /// `0` and `1` both mean every key.
    pub sample_step: u32,
}

impl SnapshotOptions {
    /// Applies `opt` according to [`TxnOptionKey::snapshot_support`].
    pub fn set(&mut self, opt: TxnOption) -> Result<()> {
        match opt {
            TxnOption::IsolationLevel(v) => self.isolation_level = v,
            TxnOption::Priority(v) => self.priority = v,
            TxnOption::NotFillCache(v) => self.not_fill_cache = v,
            TxnOption::KeyOnly(v) => self.key_only = v,
            TxnOption::ReplicaRead(v) => self.replica_read = v,
            TxnOption::TaskId(v) => self.task_id = v,
            TxnOption::SampleStep(v) => self.sample_step = v,
            other => {
                if other.key().snapshot_support() == SnapshotSupport::Rejected {
                    return Err(KvError::UnsupportedOption(other.key()));
                }
            }
        }
        Ok(())
    }

    /// Resets `key` to its default. Options a snapshot does not keep are ignored.
    pub fn del(&mut self, key: TxnOptionKey) {
        let defaults = SnapshotOptions::default();
        match key {
            TxnOptionKey::IsolationLevel => self.isolation_level = defaults.isolation_level,
            TxnOptionKey::Priority => self.priority = defaults.priority,
            TxnOptionKey::NotFillCache => self.not_fill_cache = defaults.not_fill_cache,
            TxnOptionKey::KeyOnly => self.key_only = defaults.key_only,
            TxnOptionKey::ReplicaRead => self.replica_read = defaults.replica_read,
            TxnOptionKey::TaskId => self.task_id = defaults.task_id,
            TxnOptionKey::SampleStep => self.sample_step = defaults.sample_step,
            _ => {}
        }
    }
}
