use super::{Lookup, MemKeyHandle, StagingHandle};
use crate::config::BufferLimits;
use crate::error::{KvError, Result};
use crate::flags::{FlagsOp, KeyFlags};
use crate::key::Key;
use crate::remote::MemoryTracker;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

/// What a layer recorded for a key's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Staged {
    Put(Bytes),
    Delete,
    /// A put whose payload was dropped by `discard_values`; keeps its length.
    Discarded(usize),
}

impl Staged {
    pub(crate) fn is_put(&self) -> bool {
        matches!(self, Staged::Put(_) | Staged::Discarded(_))
    }
}

/// One key's record inside one layer.
///
/// `value == None` is a flags-only entry: the value falls through to the layers
/// below while the flags here are authoritative.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) value: Option<Staged>,
    pub(crate) flags: KeyFlags,
}

/// A layer maps key slots to entries. Layers are shared with frozen views and
/// copied on first write after a view was taken.
pub(crate) type Layer = HashMap<u32, Entry>;

#[derive(Debug)]
struct StageMeta {
    generation: u32,
    /// `len`/`size` right before the stage was pushed, restored on cleanup.
    len: usize,
    size: usize,
}

/// Read-only view over an index and a layer stack.
///
/// Shared by the live buffer, its read guard and frozen snapshot views, so the
/// three agree on lookup semantics.
#[derive(Clone, Copy)]
pub(crate) struct View<'a> {
    pub(crate) index: &'a BTreeMap<Key, u32>,
    pub(crate) layers: &'a [Arc<Layer>],
    pub(crate) values_discarded: bool,
    pub(crate) epoch: u32,
}

/// Merged state of one key: topmost flags plus topmost value.
pub(crate) struct Resolved<'a> {
    pub(crate) value: Option<&'a Staged>,
    pub(crate) flags: KeyFlags,
    pub(crate) present: bool,
}

impl<'a> View<'a> {
    pub(crate) fn resolve(&self, slot: u32) -> Resolved<'a> {
        let layers: &'a [Arc<Layer>] = self.layers;
        let mut flags = None;
        for layer in layers.iter().rev() {
            if let Some(entry) = layer.get(&slot) {
                let top_flags = *flags.get_or_insert(entry.flags);
                if let Some(value) = &entry.value {
                    return Resolved {
                        value: Some(value),
                        flags: top_flags,
                        present: true,
                    };
                }
            }
        }
        Resolved {
            value: None,
            present: flags.is_some(),
            flags: flags.unwrap_or_default(),
        }
    }

    pub(crate) fn assert_values_live(&self) {
        if self.values_discarded {
            panic!("value accessed after MemBuffer::discard_values");
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Result<Bytes> {
        self.assert_values_live();
        let Some(&slot) = self.index.get(key) else {
            return Err(KvError::NotExist);
        };
        match self.resolve(slot).value {
            Some(Staged::Put(v)) => Ok(v.clone()),
            _ => Err(KvError::NotExist),
        }
    }

    pub(crate) fn get_flags(&self, key: &Key) -> Result<KeyFlags> {
        let Some(&slot) = self.index.get(key) else {
            return Err(KvError::NotExist);
        };
        let resolved = self.resolve(slot);
        if resolved.present {
            Ok(resolved.flags)
        } else {
            Err(KvError::NotExist)
        }
    }

    pub(crate) fn lookup(&self, key: &Key) -> Lookup {
        let Some(&slot) = self.index.get(key) else {
            return Lookup::Missing(KeyFlags::EMPTY);
        };
        let resolved = self.resolve(slot);
        match resolved.value {
            Some(Staged::Delete) => Lookup::Deleted,
            Some(staged) => {
                self.assert_values_live();
                match staged {
                    Staged::Put(v) => Lookup::Value(v.clone()),
                    _ => unreachable!("discarded payload behind live values"),
                }
            }
            None => Lookup::Missing(resolved.flags),
        }
    }

    /// Range over the key index, in either direction.
    pub(crate) fn range(
        &self,
        lower: Bound<&Key>,
        upper: Bound<&Key>,
    ) -> std::collections::btree_map::Range<'a, Key, u32> {
        let index: &'a BTreeMap<Key, u32> = self.index;
        index.range::<Key, _>((lower, upper))
    }
}

/// Contribution of one merged entry to `(len, size)`.
fn contribution(key_len: usize, value: Option<&Staged>) -> Option<usize> {
    match value {
        Some(Staged::Put(v)) => Some(key_len + v.len()),
        Some(Staged::Discarded(n)) => Some(key_len + n),
        Some(Staged::Delete) => Some(key_len),
        None => None,
    }
}

/// The staged layer arena behind [`super::MemBuffer`].
///
/// `layers[0]` is the base layer; `layers[i]` for `i >= 1` is the stage
/// described by `stages[i - 1]`. Every key ever written since the last reset
/// owns a slot, and the ordered `index` maps keys to slots.
pub struct MemDb {
    slots: Vec<Key>,
    index: Arc<BTreeMap<Key, u32>>,
    layers: Vec<Arc<Layer>>,
    stages: Vec<StageMeta>,
    next_generation: u32,
    epoch: u32,
    len: usize,
    size: usize,
    dirty: bool,
    values_discarded: bool,
    limits: BufferLimits,
    tracker: Option<Arc<dyn MemoryTracker>>,
}

impl std::fmt::Debug for MemDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDb")
            .field("len", &self.len)
            .field("size", &self.size)
            .field("stages", &self.stages.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl MemDb {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            slots: Vec::new(),
            index: Arc::new(BTreeMap::new()),
            layers: vec![Arc::new(Layer::new())],
            stages: Vec::new(),
            next_generation: 1,
            epoch: 0,
            len: 0,
            size: 0,
            dirty: false,
            values_discarded: false,
            limits,
            tracker: None,
        }
    }

    pub(crate) fn set_tracker(&mut self, tracker: Arc<dyn MemoryTracker>) {
        self.tracker = Some(tracker);
    }

    pub(crate) fn view(&self) -> View<'_> {
        View {
            index: &self.index,
            layers: &self.layers,
            values_discarded: self.values_discarded,
            epoch: self.epoch,
        }
    }

    /// Clones the layer stack for a frozen view.
    pub(crate) fn freeze(&self) -> (Arc<BTreeMap<Key, u32>>, Vec<Arc<Layer>>, bool, u32) {
        (
            Arc::clone(&self.index),
            self.layers.clone(),
            self.values_discarded,
            self.epoch,
        )
    }

    pub fn get(&self, key: &Key) -> Result<Bytes> {
        self.view().get(key)
    }

    pub fn get_flags(&self, key: &Key) -> Result<KeyFlags> {
        self.view().get_flags(key)
    }

    pub fn lookup(&self, key: &Key) -> Lookup {
        self.view().lookup(key)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn staging_depth(&self) -> usize {
        self.stages.len()
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn set(&mut self, key: Key, value: Bytes, ops: &[FlagsOp]) -> Result<()> {
        if value.is_empty() {
            return Err(KvError::CannotSetNilValue);
        }
        self.write(key, Some(Staged::Put(value)), ops)
    }

    pub fn delete(&mut self, key: Key, ops: &[FlagsOp]) -> Result<()> {
        self.write(key, Some(Staged::Delete), ops)
    }

    /// Updates flags only; creates a flags-only entry for unseen keys.
    pub fn update_flags(&mut self, key: Key, ops: &[FlagsOp]) {
        self.apply_write(key, None, ops);
    }

    fn write(&mut self, key: Key, value: Option<Staged>, ops: &[FlagsOp]) -> Result<()> {
        if let Some(Staged::Put(v)) = &value {
            let entry_size = (key.len() + v.len()) as u64;
            if entry_size > self.limits.entry_size_limit {
                return Err(KvError::EntryTooLarge {
                    size: entry_size,
                    limit: self.limits.entry_size_limit,
                });
            }
        }

        let old = self
            .index
            .get(&key)
            .and_then(|&slot| contribution(key.len(), self.view().resolve(slot).value))
            .unwrap_or(0);
        let new = contribution(key.len(), value.as_ref()).unwrap_or(0);
        let new_size = (self.size - old + new) as u64;
        if new_size > self.limits.total_size_limit {
            return Err(KvError::TxnTooLarge {
                size: new_size,
                limit: self.limits.total_size_limit,
            });
        }

        self.apply_write(key, value, ops);
        Ok(())
    }

    fn apply_write(&mut self, key: Key, value: Option<Staged>, ops: &[FlagsOp]) {
        let key_len = key.len();
        let slot = self.slot_or_insert(key);

        let (old_contrib, cur_flags) = {
            let resolved = self.view().resolve(slot);
            (contribution(key_len, resolved.value), resolved.flags)
        };
        let new_contrib = match &value {
            Some(v) => contribution(key_len, Some(v)),
            None => old_contrib,
        };

        let top = self.layers.len() - 1;
        let layer = Arc::make_mut(&mut self.layers[top]);
        let entry = layer.entry(slot).or_insert_with(|| Entry {
            value: None,
            flags: cur_flags,
        });
        if value.is_some() {
            entry.value = value;
        }
        entry.flags = entry.flags.apply(ops);

        if top == 0 {
            self.dirty = true;
        }
        self.account(old_contrib, new_contrib);
    }

    fn slot_or_insert(&mut self, key: Key) -> u32 {
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.slots.len() as u32;
        self.slots.push(key.clone());
        Arc::make_mut(&mut self.index).insert(key, slot);
        slot
    }

    fn account(&mut self, old: Option<usize>, new: Option<usize>) {
        let before = self.size;
        match (old, new) {
            (None, Some(n)) => {
                self.len += 1;
                self.size += n;
            }
            (Some(o), None) => {
                self.len -= 1;
                self.size -= o;
            }
            (Some(o), Some(n)) => {
                self.size = self.size - o + n;
            }
            (None, None) => {}
        }
        self.report(before);
    }

    fn report(&self, before: usize) {
        if let Some(tracker) = &self.tracker
            && before != self.size
        {
            tracker.consume(self.size as i64 - before as i64);
        }
    }

    /// Pushes a new empty layer and returns its handle.
    pub fn staging(&mut self) -> StagingHandle {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        self.stages.push(StageMeta {
            generation,
            len: self.len,
            size: self.size,
        });
        self.layers.push(Arc::new(Layer::new()));
        let handle = StagingHandle::new(self.layers.len() as u32 - 1, generation);
        debug!(depth = self.stages.len(), ?handle, "membuffer staging pushed");
        handle
    }

    /// Maps a handle to its layer index, panicking on misuse.
    fn resolve_handle(&self, handle: StagingHandle) -> usize {
        if handle == StagingHandle::LAST_ACTIVE {
            if self.stages.is_empty() {
                panic!("no active staging buffer for LAST_ACTIVE handle");
            }
            return self.layers.len() - 1;
        }
        if handle == StagingHandle::INVALID {
            panic!("invalid staging handle");
        }
        let idx = handle.index() as usize;
        match self.stages.get(idx.wrapping_sub(1)) {
            Some(meta) if idx >= 1 && meta.generation == handle.generation() => idx,
            _ => panic!(
                "staging handle {:?} is stale or already closed (depth {})",
                handle,
                self.stages.len()
            ),
        }
    }

    /// Merges the layer at `handle` and every layer above it into the layer
    /// directly below, oldest first.
    pub fn release(&mut self, handle: StagingHandle) {
        let idx = self.resolve_handle(handle);
        let merged = self.layers.split_off(idx);
        self.stages.truncate(idx - 1);

        let parent_idx = idx - 1;
        let mut touched = false;
        let parent = Arc::make_mut(&mut self.layers[parent_idx]);
        for layer in merged {
            let layer = Arc::try_unwrap(layer).unwrap_or_else(|shared| (*shared).clone());
            for (slot, entry) in layer {
                touched = true;
                match parent.get_mut(&slot) {
                    Some(existing) => {
                        if entry.value.is_some() {
                            existing.value = entry.value;
                        }
                        existing.flags = entry.flags;
                    }
                    None => {
                        parent.insert(slot, entry);
                    }
                }
            }
        }
        if parent_idx == 0 && touched {
            self.dirty = true;
        }
        debug!(depth = self.stages.len(), ?handle, "membuffer staging released");
    }

    /// Discards the layer at `handle` and every layer above it.
    ///
    /// Persistent flag bits recorded in the discarded layers are carried into
    /// the new top layer; values are not.
    pub fn cleanup(&mut self, handle: StagingHandle) {
        let idx = self.resolve_handle(handle);
        let discarded = self.layers.split_off(idx);
        let restored = self.stages.split_off(idx - 1);
        let before = self.size;
        if let Some(meta) = restored.first() {
            self.len = meta.len;
            self.size = meta.size;
        }

        let mut carried: HashMap<u32, KeyFlags> = HashMap::new();
        for layer in &discarded {
            for (slot, entry) in layer.iter() {
                let persistent = entry.flags.persistent();
                if !persistent.is_empty() {
                    *carried.entry(*slot).or_default() |= persistent;
                }
            }
        }
        for (slot, bits) in carried {
            let cur_flags = self.view().resolve(slot).flags;
            let top = self.layers.len() - 1;
            let layer = Arc::make_mut(&mut self.layers[top]);
            let entry = layer.entry(slot).or_insert_with(|| Entry {
                value: None,
                flags: cur_flags,
            });
            entry.flags |= bits;
        }

        self.report(before);
        debug!(depth = self.stages.len(), ?handle, "membuffer staging cleaned up");
    }

    /// Visits the entries written in exactly the layer at `handle`, in key order.
    pub fn inspect_stage<F>(&self, handle: StagingHandle, mut f: F)
    where
        F: FnMut(&Key, KeyFlags, Option<&[u8]>),
    {
        let idx = self.resolve_handle(handle);
        let layer = &self.layers[idx];
        let mut slots: Vec<u32> = layer.keys().copied().collect();
        slots.sort_by(|a, b| self.slots[*a as usize].cmp(&self.slots[*b as usize]));
        for slot in slots {
            let entry = &layer[&slot];
            let value = match &entry.value {
                Some(staged) if staged.is_put() => {
                    self.view().assert_values_live();
                    match staged {
                        Staged::Put(v) => Some(&v[..]),
                        _ => None,
                    }
                }
                _ => None,
            };
            f(&self.slots[slot as usize], entry.flags, value);
        }
    }

    /// Returns the newest historical value of `key` accepted by `predicate`.
    ///
    /// Walks the layers from the top down to the base. Tombstones and
    /// flags-only entries are skipped.
    pub fn select_value_history<P>(&self, key: &Key, mut predicate: P) -> Result<Bytes>
    where
        P: FnMut(&[u8]) -> bool,
    {
        self.view().assert_values_live();
        let Some(&slot) = self.index.get(key) else {
            return Err(KvError::NotExist);
        };
        for layer in self.layers.iter().rev() {
            if let Some(Entry {
                value: Some(Staged::Put(v)),
                ..
            }) = layer.get(&slot)
                && predicate(&v[..])
            {
                return Ok(v.clone());
            }
        }
        Err(KvError::NotExist)
    }

    pub fn discard_values(&mut self) {
        self.values_discarded = true;
        for layer in self.layers.iter_mut() {
            let layer = Arc::make_mut(layer);
            for entry in layer.values_mut() {
                let len = match &entry.value {
                    Some(Staged::Put(v)) => v.len(),
                    _ => continue,
                };
                entry.value = Some(Staged::Discarded(len));
            }
        }
        debug!(len = self.len, "membuffer values discarded");
    }

    pub fn reset(&mut self) {
        let before = self.size;
        self.slots.clear();
        self.index = Arc::new(BTreeMap::new());
        self.layers = vec![Arc::new(Layer::new())];
        self.stages.clear();
        self.epoch = self.epoch.wrapping_add(1);
        self.len = 0;
        self.size = 0;
        self.dirty = false;
        self.values_discarded = false;
        self.report(before);
    }

    fn check_handle(&self, handle: MemKeyHandle) -> usize {
        if handle.epoch != self.epoch || handle.slot as usize >= self.slots.len() {
            panic!("MemKeyHandle {:?} used after MemBuffer::reset", handle);
        }
        handle.slot as usize
    }

    pub fn get_key_by_handle(&self, handle: MemKeyHandle) -> Key {
        self.slots[self.check_handle(handle)].clone()
    }

    /// Returns the merged value behind `handle`, or `None` for tombstones and
    /// flags-only entries.
    pub fn get_value_by_handle(&self, handle: MemKeyHandle) -> Option<Bytes> {
        let slot = self.check_handle(handle) as u32;
        let view = self.view();
        view.assert_values_live();
        match view.resolve(slot).value {
            Some(Staged::Put(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub(crate) fn handle_for(&self, slot: u32) -> MemKeyHandle {
        MemKeyHandle {
            slot,
            epoch: self.epoch,
        }
    }
}
