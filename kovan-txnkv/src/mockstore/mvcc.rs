use crate::key::Key;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Put,
    Delete,
    /// A lock-only commit: conflicts like a write, carries no value.
    Lock,
    Rollback,
}

/// A CF_WRITE record, keyed by commit timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteInfo {
    pub start_ts: u64,
    pub kind: WriteKind,
}

/// CF_WRITE and CF_DATA.
#[derive(Debug, Default)]
pub(crate) struct Columns {
    /// key -> commit_ts -> record
    write: BTreeMap<Key, BTreeMap<u64, WriteInfo>>,
    /// (key, start_ts) -> value
    data: HashMap<(Key, u64), Bytes>,
}

impl Columns {
    /// The value visible at `version`.
    pub(crate) fn read(&self, key: &Key, version: u64) -> Option<Bytes> {
        self.write.get(key).and_then(|versions| self.visible(key, versions, version))
    }

    fn visible(&self, key: &Key, versions: &BTreeMap<u64, WriteInfo>, version: u64) -> Option<Bytes> {
        for (_, info) in versions.range(..=version).rev() {
            match info.kind {
                WriteKind::Put => return self.data.get(&(key.clone(), info.start_ts)).cloned(),
                WriteKind::Delete => return None,
                WriteKind::Lock | WriteKind::Rollback => continue,
            }
        }
        None
    }

    /// Newest commit record that is not a rollback.
    pub(crate) fn latest_commit(&self, key: &Key) -> Option<(u64, WriteInfo)> {
        self.write.get(key).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|(_, info)| info.kind != WriteKind::Rollback)
                .map(|(ts, info)| (*ts, *info))
        })
    }

    /// Visible pairs in `[lower, upper)`, every `step`th, at most `limit`.
    pub(crate) fn scan(
        &self,
        lower: &Key,
        upper: Option<&Key>,
        limit: usize,
        reverse: bool,
        version: u64,
        skip: usize,
        step: usize,
    ) -> Vec<(Key, Bytes)> {
        let upper_bound = match upper {
            Some(u) if u <= lower => return Vec::new(),
            Some(u) => Bound::Excluded(u),
            None => Bound::Unbounded,
        };
        let range = self
            .write
            .range::<Key, _>((Bound::Included(lower), upper_bound));
        let visible = |(key, versions): (&Key, &BTreeMap<u64, WriteInfo>)| {
            self.visible(key, versions, version).map(|v| (key.clone(), v))
        };
        let step = step.max(1);
        if reverse {
            range
                .rev()
                .filter_map(visible)
                .skip(skip)
                .step_by(step)
                .take(limit)
                .collect()
        } else {
            range
                .filter_map(visible)
                .skip(skip)
                .step_by(step)
                .take(limit)
                .collect()
        }
    }

    pub(crate) fn put_write(&mut self, key: &Key, commit_ts: u64, info: WriteInfo) {
        self.write
            .entry(key.clone())
            .or_default()
            .insert(commit_ts, info);
    }

    pub(crate) fn put_data(&mut self, key: &Key, start_ts: u64, value: Bytes) {
        self.data.insert((key.clone(), start_ts), value);
    }
}
