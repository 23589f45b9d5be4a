use crate::error::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default limit of a single entry (`len(key) + len(value)`).
pub const DEF_TXN_ENTRY_SIZE_LIMIT: u64 = 6 * 1024 * 1024;
/// Default limit of the sum of all entry sizes in one transaction.
pub const DEF_TXN_TOTAL_SIZE_LIMIT: u64 = 100 * 1024 * 1024;
/// Max time a transaction may live from begin to commit, in milliseconds.
pub const MAX_TXN_TIME_USE_MS: u64 = 24 * 60 * 60 * 1000;

/// Process-wide settings for buffers and transactions.
///
/// Built once (usually from TOML) and handed to [`crate::TxnKv`], which passes it
/// down to every transaction and buffer it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub entry_size_limit: u64,
    pub total_size_limit: u64,
    pub max_txn_time_use_ms: u64,
    /// Granularity of the lock-wait loop; the kill signal is checked this often.
    pub lock_wait_poll_ms: u64,
    /// Page size used by snapshot scans.
    pub scan_batch_size: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            entry_size_limit: DEF_TXN_ENTRY_SIZE_LIMIT,
            total_size_limit: DEF_TXN_TOTAL_SIZE_LIMIT,
            max_txn_time_use_ms: MAX_TXN_TIME_USE_MS,
            lock_wait_poll_ms: 10,
            scan_batch_size: 256,
        }
    }
}

impl KvConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: KvConfig = toml::from_str(s).map_err(|e| KvError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entry_size_limit == 0 {
            return Err(KvError::Config("entry_size_limit must be positive".into()));
        }
        if self.total_size_limit < self.entry_size_limit {
            return Err(KvError::Config(format!(
                "total_size_limit ({}) must not be below entry_size_limit ({})",
                self.total_size_limit, self.entry_size_limit
            )));
        }
        if self.lock_wait_poll_ms == 0 {
            return Err(KvError::Config("lock_wait_poll_ms must be positive".into()));
        }
        if self.scan_batch_size == 0 {
            return Err(KvError::Config("scan_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            entry_size_limit: self.entry_size_limit,
            total_size_limit: self.total_size_limit,
        }
    }

    pub fn lock_wait_poll(&self) -> Duration {
        Duration::from_millis(self.lock_wait_poll_ms)
    }

    pub fn max_txn_time_use(&self) -> Duration {
        Duration::from_millis(self.max_txn_time_use_ms)
    }
}

/// The subset of [`KvConfig`] a [`crate::MemBuffer`] enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub entry_size_limit: u64,
    pub total_size_limit: u64,
}

impl Default for BufferLimits {
    fn default() -> Self {
        KvConfig::default().buffer_limits()
    }
}
