use bytes::Bytes;
use std::borrow::Borrow;
use std::fmt;

/// An opaque, immutable key. Ordering is lexicographic over the raw bytes.
///
/// Backed by [`Bytes`] so clones taken by snapshot views and iterators are cheap.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The smallest key strictly greater than `self`.
    pub fn next(&self) -> Key {
        let mut buf = Vec::with_capacity(self.0.len() + 1);
        buf.extend_from_slice(&self.0);
        buf.push(0);
        Key(Bytes::from(buf))
    }

    /// The smallest key greater than every key that has `self` as a prefix.
    ///
    /// Trailing `0xFF` bytes are dropped before incrementing. A key made only of
    /// `0xFF` bytes has no finite successor and is returned unchanged.
    pub fn prefix_next(&self) -> Key {
        let mut buf = self.0.to_vec();
        while let Some(last) = buf.last_mut() {
            if *last == 0xFF {
                buf.pop();
                continue;
            }
            *last += 1;
            return Key(Bytes::from(buf));
        }
        self.clone()
    }

    pub fn has_prefix(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&'static str> for Key {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<&[u8]> for Key {
    fn from(v: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(v))
    }
}

impl From<Bytes> for Key {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "Key({:?})", s),
            _ => write!(f, "Key(0x{})", self),
        }
    }
}

/// Half-open key range `[start, end)`. An empty `end` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Key,
    pub end: Key,
}

impl KeyRange {
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn prefix(prefix: impl Into<Key>) -> Self {
        let start = prefix.into();
        let end = start.prefix_next();
        Self { start, end }
    }

    pub fn contains(&self, key: &Key) -> bool {
        *key >= self.start && (self.end.is_empty() || *key < self.end)
    }

    /// Upper bound suitable for [`crate::kv::Retriever::iter`].
    pub fn upper_bound(&self) -> Option<&Key> {
        if self.end.is_empty() {
            None
        } else {
            Some(&self.end)
        }
    }
}
