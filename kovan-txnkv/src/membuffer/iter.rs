use super::memdb::{MemDb, Resolved, Staged, View};
use super::snapshot::Frozen;
use super::MemKeyHandle;
use crate::flags::KeyFlags;
use crate::key::Key;
use bytes::Bytes;
use parking_lot::RwLock;
use std::ops::Bound;
use std::sync::Arc;

/// Where an iterator reads its layers from.
pub(crate) enum Source<'a> {
    /// The live buffer; the read lock is taken for each step only.
    Shared(&'a RwLock<MemDb>),
    /// A buffer already held by a read guard.
    Borrowed(&'a MemDb),
    /// A frozen copy, independent of later writes.
    Frozen(Arc<Frozen>),
}

impl Source<'_> {
    fn with_view<R>(&self, f: impl FnOnce(View<'_>) -> R) -> R {
        match self {
            Source::Shared(lock) => {
                let db = lock.read();
                f(db.view())
            }
            Source::Borrowed(db) => f(db.view()),
            Source::Frozen(frozen) => f(frozen.view()),
        }
    }
}

/// Remaining key range of an iterator. The bound on the side the iterator
/// moves from is advanced past every yielded key, so a step never revisits it
/// even if the buffer changed in between.
struct Cursor {
    lower: Bound<Key>,
    upper: Bound<Key>,
    reverse: bool,
    done: bool,
}

impl Cursor {
    fn forward(start: &Key, upper_bound: Option<&Key>) -> Self {
        Self {
            lower: Bound::Included(start.clone()),
            upper: exclusive(upper_bound),
            reverse: false,
            done: false,
        }
    }

    fn reverse(start: Option<&Key>) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: exclusive(start),
            reverse: true,
            done: false,
        }
    }

    /// BTreeMap::range panics on inverted bounds; treat them as empty.
    fn is_empty_range(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Excluded(u)) | (Bound::Excluded(l), Bound::Excluded(u)) => {
                l >= u
            }
            (Bound::Included(l), Bound::Included(u)) | (Bound::Excluded(l), Bound::Included(u)) => {
                l > u
            }
            _ => false,
        }
    }

    fn advance(&mut self, key: &Key) {
        if self.reverse {
            self.upper = Bound::Excluded(key.clone());
        } else {
            self.lower = Bound::Excluded(key.clone());
        }
    }
}

/// An empty upper bound means unbounded.
fn exclusive(bound: Option<&Key>) -> Bound<Key> {
    match bound {
        Some(k) if !k.is_empty() => Bound::Excluded(k.clone()),
        _ => Bound::Unbounded,
    }
}

struct Raw {
    key: Key,
    slot: u32,
    flags: KeyFlags,
    value: Option<Staged>,
    values_discarded: bool,
    epoch: u32,
}

struct Walker<'a> {
    source: Source<'a>,
    cursor: Cursor,
}

impl Walker<'_> {
    /// Next present key accepted by `accept`, in cursor order.
    fn step(&mut self, accept: fn(&Resolved<'_>) -> bool) -> Option<Raw> {
        if self.cursor.done {
            return None;
        }
        let cursor = &self.cursor;
        let found = self.source.with_view(|view| {
            if cursor.is_empty_range() {
                return None;
            }
            let mut range = view.range(cursor.lower.as_ref(), cursor.upper.as_ref());
            loop {
                let (key, &slot) = if cursor.reverse {
                    range.next_back()?
                } else {
                    range.next()?
                };
                let resolved = view.resolve(slot);
                if resolved.present && accept(&resolved) {
                    return Some(Raw {
                        key: key.clone(),
                        slot,
                        flags: resolved.flags,
                        value: resolved.value.cloned(),
                        values_discarded: view.values_discarded,
                        epoch: view.epoch,
                    });
                }
            }
        });
        match &found {
            Some(raw) => self.cursor.advance(&raw.key),
            None => self.cursor.done = true,
        }
        found
    }
}

fn is_put(resolved: &Resolved<'_>) -> bool {
    resolved.value.is_some_and(Staged::is_put)
}

fn any(_: &Resolved<'_>) -> bool {
    true
}

/// Lazy iterator over the live values of a buffer's merged view.
///
/// Tombstoned and flags-only keys are skipped. Yielding a value after
/// [`super::MemBuffer::discard_values`] panics.
pub struct MemBufferIter<'a> {
    walker: Walker<'a>,
}

/// An iterator over a frozen view; owns its data.
pub type SnapshotIter = MemBufferIter<'static>;

impl<'a> MemBufferIter<'a> {
    pub(crate) fn forward(source: Source<'a>, start: &Key, upper_bound: Option<&Key>) -> Self {
        Self {
            walker: Walker {
                source,
                cursor: Cursor::forward(start, upper_bound),
            },
        }
    }

    pub(crate) fn reverse(source: Source<'a>, start: Option<&Key>) -> Self {
        Self {
            walker: Walker {
                source,
                cursor: Cursor::reverse(start),
            },
        }
    }
}

impl Iterator for MemBufferIter<'_> {
    type Item = (Key, Bytes);

    fn next(&mut self) -> Option<(Key, Bytes)> {
        let raw = self.walker.step(is_put)?;
        if raw.values_discarded {
            panic!("value accessed after MemBuffer::discard_values");
        }
        match raw.value {
            Some(Staged::Put(v)) => Some((raw.key, v)),
            _ => unreachable!("step only yields put entries"),
        }
    }
}

/// Like [`MemBufferIter`], but yields every key known to the merged view,
/// tombstones and flags-only entries included.
pub struct MemBufferIterWithFlags<'a> {
    walker: Walker<'a>,
}

impl<'a> MemBufferIterWithFlags<'a> {
    pub(crate) fn forward(source: Source<'a>, start: &Key, upper_bound: Option<&Key>) -> Self {
        Self {
            walker: Walker {
                source,
                cursor: Cursor::forward(start, upper_bound),
            },
        }
    }

    pub(crate) fn reverse(source: Source<'a>, start: Option<&Key>) -> Self {
        Self {
            walker: Walker {
                source,
                cursor: Cursor::reverse(start),
            },
        }
    }
}

impl Iterator for MemBufferIterWithFlags<'_> {
    type Item = MemBufferEntry;

    fn next(&mut self) -> Option<MemBufferEntry> {
        let raw = self.walker.step(any)?;
        Some(MemBufferEntry {
            handle: MemKeyHandle {
                slot: raw.slot,
                epoch: raw.epoch,
            },
            key: raw.key,
            flags: raw.flags,
            value: raw.value,
            values_discarded: raw.values_discarded,
        })
    }
}

/// One key of the merged view as seen by a flags iterator.
#[derive(Debug, Clone)]
pub struct MemBufferEntry {
    key: Key,
    flags: KeyFlags,
    handle: MemKeyHandle,
    value: Option<Staged>,
    values_discarded: bool,
}

impl MemBufferEntry {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    pub fn handle(&self) -> MemKeyHandle {
        self.handle
    }

    /// False for flags-only entries. Tombstones have a (deleting) value.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, Some(Staged::Delete))
    }

    /// The live value, `None` for tombstones and flags-only entries.
    ///
    /// # Panics
    ///
    /// If the buffer's values were discarded before this entry was read.
    pub fn value(&self) -> Option<&Bytes> {
        if self.values_discarded {
            panic!("value accessed after MemBuffer::discard_values");
        }
        match &self.value {
            Some(Staged::Put(v)) => Some(v),
            _ => None,
        }
    }
}
