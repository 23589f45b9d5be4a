use crate::error::{KvError, Result};
use crate::key::Key;
use crate::kv::{BatchGetter, BoxKvIter, Getter, Retriever};
use crate::options::{SnapshotOptions, TxnOption, TxnOptionKey};
use crate::remote::{KvStore, ScanRequest};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// Read-only view of the remote store at a fixed version.
#[derive(Clone)]
pub struct Snapshot {
    store: Arc<dyn KvStore>,
    version: u64,
    opts: SnapshotOptions,
    scan_batch_size: usize,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("opts", &self.opts)
            .finish()
    }
}

impl Snapshot {
    pub fn new(store: Arc<dyn KvStore>, version: u64, scan_batch_size: usize) -> Self {
        Self {
            store,
            version,
            opts: SnapshotOptions::default(),
            scan_batch_size: scan_batch_size.max(1),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn options(&self) -> &SnapshotOptions {
        &self.opts
    }

    /// Fails only for options a snapshot cannot honor, such as a new version.
    pub fn set_option(&mut self, opt: TxnOption) -> Result<()> {
        self.opts.set(opt)
    }

    pub fn del_option(&mut self, key: TxnOptionKey) {
        self.opts.del(key)
    }

    pub fn get(&self, key: &Key) -> Result<Bytes> {
        match self.store.get(key, self.version, &self.opts)? {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(KvError::NotExist),
        }
    }

    /// Absent keys are left out of the result, never mapped to an empty value.
    pub fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut found = self.store.batch_get(keys, self.version, &self.opts)?;
        found.retain(|_, v| !v.is_empty());
        trace!(requested = keys.len(), found = found.len(), version = self.version, "snapshot batch_get");
        Ok(found)
    }

    /// Ascending scan over `[start, upper_bound)`, fetched page by page.
    pub fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> ScanIter<'_> {
        ScanIter {
            snapshot: self,
            lower: start.clone(),
            upper: upper_bound.filter(|k| !k.is_empty()).cloned(),
            reverse: false,
            page: VecDeque::new(),
            skip: 0,
            exhausted: false,
        }
    }

    /// Descending scan over keys below `start`; `None` starts from the last key.
    pub fn iter_reverse(&self, start: Option<&Key>) -> ScanIter<'_> {
        ScanIter {
            snapshot: self,
            lower: Key::default(),
            upper: start.filter(|k| !k.is_empty()).cloned(),
            reverse: true,
            page: VecDeque::new(),
            skip: 0,
            exhausted: false,
        }
    }
}

/// Lazily paginated scan over a [`Snapshot`].
pub struct ScanIter<'a> {
    snapshot: &'a Snapshot,
    lower: Key,
    upper: Option<Key>,
    reverse: bool,
    page: VecDeque<(Key, Bytes)>,
    skip: usize,
    exhausted: bool,
}

impl ScanIter<'_> {
    fn fetch(&mut self) -> Result<()> {
        let limit = self.snapshot.scan_batch_size;
        let req = ScanRequest {
            lower: &self.lower,
            upper: self.upper.as_ref(),
            limit,
            reverse: self.reverse,
            version: self.snapshot.version,
            skip: self.skip,
        };
        let page = self.snapshot.store.scan(req, &self.snapshot.opts)?;
        if page.len() < limit {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            // The next page resumes the sampling stride after `last`.
            self.skip = self.snapshot.opts.sample_step.max(1) as usize - 1;
            if self.reverse {
                self.upper = Some(last.clone());
            } else {
                self.lower = last.next();
            }
        }
        self.page.extend(page.into_iter().filter(|(_, v)| !v.is_empty()));
        Ok(())
    }
}

impl Iterator for ScanIter<'_> {
    type Item = Result<(Key, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.page.pop_front() {
                return Some(Ok(pair));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

impl Getter for Snapshot {
    fn get(&self, key: &Key) -> Result<Bytes> {
        Snapshot::get(self, key)
    }
}

impl BatchGetter for Snapshot {
    fn batch_get(&self, keys: &[Key]) -> Result<HashMap<Key, Bytes>> {
        Snapshot::batch_get(self, keys)
    }
}

impl Retriever for Snapshot {
    fn iter(&self, start: &Key, upper_bound: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(Snapshot::iter(self, start, upper_bound)))
    }

    fn iter_reverse(&self, start: Option<&Key>) -> Result<BoxKvIter<'_>> {
        Ok(Box::new(Snapshot::iter_reverse(self, start)))
    }
}
