use crate::error::{KvError, Result};
use crate::key::Key;
use crate::kv::{BatchGetter, BoxKvIter, Getter, Retriever};
use crate::membuffer::{Lookup, MemBuffer, MemBufferEntry, MemBufferIterWithFlags};
use crate::snapshot::{ScanIter, Snapshot};
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::iter::Peekable;

/// A transaction's buffer layered over its snapshot.
///
/// Reads consult the buffer first. A buffered tombstone hides the snapshot's
/// value, and a miss on a key flagged `PRESUME_KEY_NOT_EXISTS` is final.
#[derive(Debug)]
pub struct UnionStore {
    buffer: MemBuffer,
    snapshot: Snapshot,
}

impl UnionStore {
    pub fn new(buffer: MemBuffer, snapshot: Snapshot) -> Self {
        Self { buffer, snapshot }
    }

    pub fn mem_buffer(&self) -> &MemBuffer {
        &self.buffer
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    pub fn get(&self, key: &Key) -> Result<Bytes> {
        match self.buffer.lookup(key) {
            Lookup::Value(v) => Ok(v),
            Lookup::Deleted => Err(KvError::NotExist),
            Lookup::Missing(flags) if flags.has_presume_key_not_exists() => Err(KvError::NotExist),
            Lookup::Missing(_) => self.snapshot.get(key),
        }
    }

    /// Only keys with a value appear in the result.
    pub fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut remote = Vec::new();
        for key in keys {
            match self.buffer.lookup(key) {
                Lookup::Value(v) => {
                    found.insert(key.clone(), v);
                }
                Lookup::Deleted => {}
                Lookup::Missing(flags) if flags.has_presume_key_not_exists() => {}
                Lookup::Missing(_) => remote.push(key.clone()),
            }
        }
        if !remote.is_empty() {
            found.extend(self.snapshot.batch_get(&remote)?);
        }
        Ok(found)
    }

    pub fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> UnionIter<'_> {
        UnionIter::new(
            self.buffer.iter_with_flags(start, upper_bound),
            self.snapshot.iter(start, upper_bound),
            false,
        )
    }

    pub fn iter_reverse(&self, start: Option<&Key>) -> UnionIter<'_> {
        UnionIter::new(
            self.buffer.iter_reverse_with_flags(start),
            self.snapshot.iter_reverse(start),
            true,
        )
    }
}

/// Merges buffered entries with a snapshot scan. On equal keys the buffer
/// wins; buffered tombstones are dropped along with the remote value.
pub struct UnionIter<'a> {
    dirty: Peekable<std::iter::Filter<MemBufferIterWithFlags<'a>, fn(&MemBufferEntry) -> bool>>,
    snapshot: Peekable<ScanIter<'a>>,
    reverse: bool,
}

enum Pick {
    Dirty,
    Snapshot,
    /// Same key on both sides.
    Both,
    Done,
}

impl<'a> UnionIter<'a> {
    fn new(dirty: MemBufferIterWithFlags<'a>, snapshot: ScanIter<'a>, reverse: bool) -> Self {
        let has_value: fn(&MemBufferEntry) -> bool = MemBufferEntry::has_value;
        Self {
            dirty: dirty.filter(has_value).peekable(),
            snapshot: snapshot.peekable(),
            reverse,
        }
    }

    fn pick(&mut self) -> Pick {
        let remote_key = match self.snapshot.peek() {
            Some(Ok((k, _))) => Some(k),
            // Errors are surfaced immediately.
            Some(Err(_)) => return Pick::Snapshot,
            None => None,
        };
        match (self.dirty.peek(), remote_key) {
            (None, None) => Pick::Done,
            (Some(_), None) => Pick::Dirty,
            (None, Some(_)) => Pick::Snapshot,
            (Some(entry), Some(remote)) => {
                let mut ord = entry.key().cmp(remote);
                if self.reverse {
                    ord = ord.reverse();
                }
                match ord {
                    Ordering::Less => Pick::Dirty,
                    Ordering::Greater => Pick::Snapshot,
                    Ordering::Equal => Pick::Both,
                }
            }
        }
    }
}

impl Iterator for UnionIter<'_> {
    type Item = Result<(Key, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.pick() {
                Pick::Done => return None,
                Pick::Snapshot => return self.snapshot.next(),
                Pick::Both => {
                    self.snapshot.next();
                    self.dirty.next()?
                }
                Pick::Dirty => self.dirty.next()?,
            };
            if let Some(v) = entry.value() {
                return Some(Ok((entry.key().clone(), v.clone())));
            }
        }
    }
}

impl Getter for UnionStore {
    fn get(&self, key: &Key) -> Result<Bytes> {
        UnionStore::get(self, key)
    }
}

impl BatchGetter for UnionStore {
    fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>> {
        UnionStore::batch_get(self, keys)
    }
}

impl Retriever for UnionStore {
    fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(UnionStore::iter(self, start, upper_bound)))
    }

    fn iter_reverse(&self, start: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(UnionStore::iter_reverse(self, start)))
    }
}
