//! The staged, ordered write buffer of a transaction.
//!
//! A [`MemBuffer`] keeps a stack of layers. The base layer holds everything
//! released so far; each staging layer on top holds only the keys it changed.
//! Lookups walk from the top layer down and the first layer that knows the key
//! wins. Writes always land in the top layer.
//!
//! ```rust
//! use kovan_txnkv::{Key, MemBuffer};
//!
//! let buf = MemBuffer::default();
//! buf.set("a", "1").unwrap();
//!
//! let h = buf.staging();
//! buf.set("b", "2").unwrap();
//! buf.cleanup(h);
//!
//! assert_eq!(buf.get(&Key::from("a")).unwrap(), "1");
//! assert!(buf.get(&Key::from("b")).unwrap_err().is_not_found());
//! ```

mod iter;
mod memdb;
mod snapshot;

pub use iter::{MemBufferEntry, MemBufferIter, MemBufferIterWithFlags, SnapshotIter};
pub use memdb::MemDb;
pub use snapshot::MemBufferSnapshot;

use crate::config::BufferLimits;
use crate::error::Result;
use crate::flags::{FlagsOp, KeyFlags};
use crate::key::Key;
use crate::kv::{BoxKvIter, Getter, Mutator, Retriever};
use crate::remote::MemoryTracker;
use bytes::Bytes;
use iter::Source;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// Identifies one layer of a [`MemBuffer`]'s staging stack.
///
/// Handles carry the generation of the layer they were issued for, so a handle
/// that outlived its layer is rejected even if a new layer now sits at the same
/// depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingHandle {
    index: u32,
    generation: u32,
}

impl StagingHandle {
    /// Never returned by [`MemBuffer::staging`].
    pub const INVALID: StagingHandle = StagingHandle {
        index: 0,
        generation: 0,
    };
    /// Always resolves to the topmost active staging layer.
    pub const LAST_ACTIVE: StagingHandle = StagingHandle {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(self) -> u32 {
        self.index
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Stable reference to a key's slot, obtained from a flags iterator.
///
/// Valid until the buffer is reset. Reading the value behind it after
/// [`MemBuffer::discard_values`] panics; reading the key does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemKeyHandle {
    pub(crate) slot: u32,
    pub(crate) epoch: u32,
}

/// Merged state of one key, distinguishing a tombstone from a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Value(Bytes),
    Deleted,
    /// No value in any layer. Carries the key's flags, empty if it has none.
    Missing(KeyFlags),
}

/// A transaction's staged key-value buffer.
///
/// All methods take `&self`: the buffer guards its state with a reader-writer
/// lock so a single secondary reader (see [`MemBuffer::rlock`]) can run
/// read-only operations while the owner keeps writing. Structural operations
/// (`staging`, `release`, `cleanup`, `reset`) are the owner's responsibility
/// and must not be interleaved with an open read window.
pub struct MemBuffer {
    db: RwLock<MemDb>,
}

impl Default for MemBuffer {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}

impl std::fmt::Debug for MemBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MemBuffer").field(&*self.db.read()).finish()
    }
}

impl MemBuffer {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            db: RwLock::new(MemDb::new(limits)),
        }
    }

    /// Reports every size change to `tracker`.
    pub fn set_memory_tracker(&self, tracker: Arc<dyn MemoryTracker>) {
        self.db.write().set_tracker(tracker);
    }

    /// Opens a shared-read window for a secondary reader.
    ///
    /// Owner writes block until the returned guard is dropped.
    pub fn rlock(&self) -> MemBufferReadGuard<'_> {
        MemBufferReadGuard {
            db: self.db.read(),
        }
    }

    pub fn get(&self, key: &Key) -> Result<Bytes> {
        self.db.read().get(key)
    }

    pub fn get_flags(&self, key: &Key) -> Result<KeyFlags> {
        self.db.read().get_flags(key)
    }

    pub fn lookup(&self, key: &Key) -> Lookup {
        self.db.read().lookup(key)
    }

    /// Fails with [`crate::KvError::CannotSetNilValue`] for an empty value.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Bytes>) -> Result<()> {
        self.db.write().set(key.into(), value.into(), &[])
    }

    pub fn set_with_flags(
        &self,
        key: impl Into<Key>,
        value: impl Into<Bytes>,
        ops: &[FlagsOp],
    ) -> Result<()> {
        self.db.write().set(key.into(), value.into(), ops)
    }

    /// Records a tombstone for `key`.
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        self.db.write().delete(key.into(), &[])
    }

    pub fn delete_with_flags(&self, key: impl Into<Key>, ops: &[FlagsOp]) -> Result<()> {
        self.db.write().delete(key.into(), ops)
    }

    pub fn update_flags(&self, key: impl Into<Key>, ops: &[FlagsOp]) {
        self.db.write().update_flags(key.into(), ops)
    }

    /// Ascending iterator over live values in `[start, upper_bound)`.
    pub fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> MemBufferIter<'_> {
        MemBufferIter::forward(Source::Shared(&self.db), start, upper_bound)
    }

    /// Descending iterator over live values below `start` (from the last key if `None`).
    pub fn iter_reverse(&self, start: Option<&Key>) -> MemBufferIter<'_> {
        MemBufferIter::reverse(Source::Shared(&self.db), start)
    }

    /// Like [`MemBuffer::iter`] but yields every known key, including
    /// tombstones and flags-only entries, with flags and handle.
    pub fn iter_with_flags(
        &self,
        start: &Key,
        upper_bound: Option<&Key>,
    ) -> MemBufferIterWithFlags<'_> {
        MemBufferIterWithFlags::forward(Source::Shared(&self.db), start, upper_bound)
    }

    pub fn iter_reverse_with_flags(&self, start: Option<&Key>) -> MemBufferIterWithFlags<'_> {
        MemBufferIterWithFlags::reverse(Source::Shared(&self.db), start)
    }

    pub fn get_key_by_handle(&self, handle: MemKeyHandle) -> Key {
        self.db.read().get_key_by_handle(handle)
    }

    /// `None` when the key's merged state is a tombstone or flags only.
    pub fn get_value_by_handle(&self, handle: MemKeyHandle) -> Option<Bytes> {
        self.db.read().get_value_by_handle(handle)
    }

    /// Drops every layer and key. Outstanding handles become invalid.
    pub fn reset(&self) {
        self.db.write().reset()
    }

    /// Frees all value payloads. Any later value read panics.
    pub fn discard_values(&self) {
        self.db.write().discard_values()
    }

    pub fn staging(&self) -> StagingHandle {
        self.db.write().staging()
    }

    pub fn release(&self, handle: StagingHandle) {
        self.db.write().release(handle)
    }

    pub fn cleanup(&self, handle: StagingHandle) {
        self.db.write().cleanup(handle)
    }

    pub fn inspect_stage<F>(&self, handle: StagingHandle, f: F)
    where
        F: FnMut(&Key, KeyFlags, Option<&[u8]>),
    {
        self.db.read().inspect_stage(handle, f)
    }

    pub fn select_value_history<P>(&self, key: &Key, predicate: P) -> Result<Bytes>
    where
        P: FnMut(&[u8]) -> bool,
    {
        self.db.read().select_value_history(key, predicate)
    }

    /// A getter frozen to the merged state at call time.
    pub fn snapshot_getter(&self) -> MemBufferSnapshot {
        MemBufferSnapshot::new(&self.db.read())
    }

    /// An iterator frozen to the merged state at call time.
    pub fn snapshot_iter(&self, start: &Key, upper_bound: Option<&Key>) -> SnapshotIter {
        self.snapshot_getter().into_iter_range(start, upper_bound)
    }

    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }

    pub fn size(&self) -> usize {
        self.db.read().size()
    }

    /// Whether the base layer has been modified.
    pub fn dirty(&self) -> bool {
        self.db.read().dirty()
    }

    pub fn staging_depth(&self) -> usize {
        self.db.read().staging_depth()
    }
}

/// Shared-read window over a [`MemBuffer`]; see [`MemBuffer::rlock`].
pub struct MemBufferReadGuard<'a> {
    db: RwLockReadGuard<'a, MemDb>,
}

impl MemBufferReadGuard<'_> {
    pub fn get(&self, key: &Key) -> Result<Bytes> {
        self.db.get(key)
    }

    pub fn get_flags(&self, key: &Key) -> Result<KeyFlags> {
        self.db.get_flags(key)
    }

    pub fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> MemBufferIter<'_> {
        MemBufferIter::forward(Source::Borrowed(&self.db), start, upper_bound)
    }

    pub fn iter_reverse(&self, start: Option<&Key>) -> MemBufferIter<'_> {
        MemBufferIter::reverse(Source::Borrowed(&self.db), start)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn size(&self) -> usize {
        self.db.size()
    }
}

impl Getter for MemBuffer {
    fn get(&self, key: &Key) -> Result<Bytes> {
        MemBuffer::get(self, key)
    }
}

impl Retriever for MemBuffer {
    fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(MemBuffer::iter(self, start, upper_bound).map(Ok)))
    }

    fn iter_reverse(&self, start: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(MemBuffer::iter_reverse(self, start).map(Ok)))
    }
}

impl Mutator for MemBuffer {
    fn set(&mut self, key: Key, value: Bytes) -> Result<()> {
        MemBuffer::set(self, key, value)
    }

    fn delete(&mut self, key: Key) -> Result<()> {
        MemBuffer::delete(self, key)
    }
}
