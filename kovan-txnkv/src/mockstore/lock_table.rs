use crate::key::Key;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A pessimistic lock as stored in CF_LOCK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub primary: Key,
    /// Identifies the owning transaction.
    pub start_ts: u64,
    pub for_update_ts: u64,
}

/// Separate lock table (CF_LOCK in TiKV)
///
/// Locks live apart from committed versions; a key holds at most one lock.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<Key, LockInfo>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock on `key`, or refreshes it if `lock` has the same owner.
    ///
    /// On contention returns the holder's lock.
    pub fn try_lock(&self, key: &Key, lock: LockInfo) -> Result<(), LockInfo> {
        match self.locks.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(lock);
                Ok(())
            }
            Entry::Occupied(mut held) => {
                if held.get().start_ts != lock.start_ts {
                    return Err(held.get().clone());
                }
                let held = held.get_mut();
                held.for_update_ts = held.for_update_ts.max(lock.for_update_ts);
                Ok(())
            }
        }
    }

    pub fn get_lock(&self, key: &Key) -> Option<LockInfo> {
        self.locks.get(key).map(|l| l.clone())
    }

    pub fn unlock(&self, key: &Key) -> Option<LockInfo> {
        self.locks.remove(key).map(|(_, l)| l)
    }

    /// Removes the lock only if `start_ts` owns it.
    pub fn unlock_if_owner(&self, key: &Key, start_ts: u64) -> bool {
        self.locks
            .remove_if(key, |_, l| l.start_ts == start_ts)
            .is_some()
    }

    pub fn is_locked_by(&self, key: &Key, start_ts: u64) -> bool {
        self.locks
            .get(key)
            .is_some_and(|l| l.start_ts == start_ts)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
