//! Read/write seams shared by buffers, snapshots and transactions.

use crate::error::Result;
use crate::key::Key;
use bytes::Bytes;
use std::collections::HashMap;

/// A boxed, fallible key-value iterator.
pub type BoxKvIter<'a> = Box<dyn Iterator<Item = Result<(Key, Bytes)>> + 'a>;

pub trait Getter {
    /// Returns [`crate::KvError::NotExist`] when the key has no value.
    fn get(&self, key: &Key) -> Result<Bytes>;
}

pub trait BatchGetter {
    /// The result holds an entry only for keys that exist.
    fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>>;
}

pub trait Retriever: Getter {
    /// Ascending over `[start, upper_bound)`; `None` is unbounded.
    fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<BoxKvIter<'_>>;

    /// Descending over keys `< start`; `None` starts from the last key.
    fn iter_reverse(&self, start: Option<&Key>) -> Result<BoxKvIter<'_>>;
}

pub trait Mutator {
    fn set(&mut self, key: Key, value: Bytes) -> Result<()>;

    fn delete(&mut self, key: Key) -> Result<()>;
}
