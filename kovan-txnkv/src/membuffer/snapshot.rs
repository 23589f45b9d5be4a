use super::iter::{MemBufferIter, SnapshotIter, Source};
use super::memdb::{Layer, MemDb, View};
use crate::error::Result;
use crate::key::Key;
use crate::kv::{BoxKvIter, Getter, Retriever};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Layers and index captured at one instant. Later writes to the buffer copy
/// the layers they touch instead of mutating these.
pub(crate) struct Frozen {
    index: Arc<BTreeMap<Key, u32>>,
    layers: Vec<Arc<Layer>>,
    values_discarded: bool,
    epoch: u32,
}

impl Frozen {
    pub(crate) fn view(&self) -> View<'_> {
        View {
            index: &self.index,
            layers: &self.layers,
            values_discarded: self.values_discarded,
            epoch: self.epoch,
        }
    }
}

/// Read-only view of a [`super::MemBuffer`] frozen at the moment it was taken.
#[derive(Clone)]
pub struct MemBufferSnapshot {
    frozen: Arc<Frozen>,
}

impl std::fmt::Debug for MemBufferSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemBufferSnapshot")
            .field("keys", &self.frozen.index.len())
            .field("layers", &self.frozen.layers.len())
            .finish()
    }
}

impl MemBufferSnapshot {
    pub(crate) fn new(db: &MemDb) -> Self {
        let (index, layers, values_discarded, epoch) = db.freeze();
        Self {
            frozen: Arc::new(Frozen {
                index,
                layers,
                values_discarded,
                epoch,
            }),
        }
    }

    pub fn get(&self, key: &Key) -> Result<Bytes> {
        self.frozen.view().get(key)
    }

    pub fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> SnapshotIter {
        self.clone().into_iter_range(start, upper_bound)
    }

    pub fn iter_reverse(&self, start: Option<&Key>) -> SnapshotIter {
        MemBufferIter::reverse(Source::Frozen(Arc::clone(&self.frozen)), start)
    }

    pub(crate) fn into_iter_range(self, start: &Key, upper_bound: Option<&Key>) -> SnapshotIter {
        MemBufferIter::forward(Source::Frozen(self.frozen), start, upper_bound)
    }
}

impl Getter for MemBufferSnapshot {
    fn get(&self, key: &Key) -> Result<Bytes> {
        MemBufferSnapshot::get(self, key)
    }
}

impl Retriever for MemBufferSnapshot {
    fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(MemBufferSnapshot::iter(self, start, upper_bound).map(Ok)))
    }

    fn iter_reverse(&self, start: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(MemBufferSnapshot::iter_reverse(self, start).map(Ok)))
    }
}
