#![forbid(unsafe_code)]

use crate::domain::{BUCKET_COUNT, Pattern};
use crate::error::Error;
use parking_lot::RwLock;
use std::fmt;

/// In-memory pattern index.
///
/// Patterns are partitioned into [`BUCKET_COUNT`] buckets by their first
/// byte. Each bucket keeps insertion order and sits behind its own
/// readers-writer lock: scans share the locks, while `add`/`remove` hold a
/// bucket exclusively, so mutations of one bucket are serialized and never
/// observed half-done by a scan.
pub struct PatternStore {
    buckets: [RwLock<Vec<Pattern>>; BUCKET_COUNT],
}

impl Default for PatternStore {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| RwLock::new(Vec::new())),
        }
    }
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pattern` to its bucket unless an identical one is present.
    pub fn add(&self, pattern: Pattern) -> Result<(), Error> {
        let mut bucket = self.buckets[pattern.bucket()].write();
        if bucket.iter().any(|p| p == &pattern) {
            return Err(Error::AlreadyExists);
        }
        bucket.push(pattern);
        Ok(())
    }

    /// Remove `pattern`, keeping the order of the remaining entries.
    pub fn remove(&self, pattern: &Pattern) -> Result<(), Error> {
        let mut bucket = self.buckets[pattern.bucket()].write();
        let pos = bucket
            .iter()
            .position(|p| p == pattern)
            .ok_or(Error::NotFound)?;
        bucket.remove(pos);
        Ok(())
    }

    /// Whether any pattern occurs in `buffer`.
    ///
    /// Buckets are visited in order, patterns in insertion order, and the
    /// scan stops at the first match.
    pub fn contains_any(&self, buffer: &[u8]) -> bool {
        if buffer.is_empty() {
            return false;
        }
        self.buckets
            .iter()
            .any(|bucket| bucket.read().iter().any(|p| p.occurs_in(buffer)))
    }

    /// Size of [`serialize`](Self::serialize) output: every pattern plus its newline.
    pub fn total_serialized_length(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| bucket.read().iter().map(Pattern::record_len).sum::<usize>())
            .sum()
    }

    /// All patterns, newline terminated, in bucket then insertion order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_serialized_length());
        for bucket in &self.buckets {
            for pattern in bucket.read().iter() {
                out.extend_from_slice(pattern.as_bytes());
                out.push(b'\n');
            }
        }
        out
    }

    /// Visit every pattern in serialization order, stopping at the first error.
    pub fn try_for_each<E>(&self, mut f: impl FnMut(&Pattern) -> Result<(), E>) -> Result<(), E> {
        for bucket in &self.buckets {
            for pattern in bucket.read().iter() {
                f(pattern)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.read().is_empty())
    }

    /// Release every pattern.
    pub fn clear(&self) {
        for bucket in &self.buckets {
            let mut bucket = bucket.write();
            bucket.clear();
            bucket.shrink_to_fit();
        }
    }
}

impl fmt::Debug for PatternStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternStore")
            .field("patterns", &self.len())
            .field("serialized_len", &self.total_serialized_length())
            .finish()
    }
}
