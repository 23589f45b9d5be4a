use std::sync::atomic::{AtomicU64, Ordering};

/// Source of transaction timestamps.
///
/// Implemented by a placement driver client in a cluster, or by a local
/// atomic counter for single-process use and tests.
pub trait TimestampOracle: Send + Sync {
    /// Get a strictly increasing timestamp
    fn get_timestamp(&self) -> u64;

    /// The most recently issued timestamp, without allocating a new one.
    fn current(&self) -> u64;
}

/// Local timestamp oracle using an atomic counter
pub struct LocalTimestampOracle {
    counter: AtomicU64,
}

impl LocalTimestampOracle {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_initial(initial: u64) -> Self {
        Self {
            counter: AtomicU64::new(initial),
        }
    }

    /// Moves the counter forward to at least `ts`; never moves it back.
    pub fn advance_to(&self, ts: u64) {
        self.counter.fetch_max(ts, Ordering::SeqCst);
    }
}

impl Default for LocalTimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalTimestampOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTimestampOracle")
            .field("current", &self.current())
            .finish()
    }
}

impl TimestampOracle for LocalTimestampOracle {
    fn get_timestamp(&self) -> u64 {
        // Fetch-add ensures strictly increasing timestamps
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
