#![forbid(unsafe_code)]

use crate::domain::{FileId, REMOVAL_COUNT_INIT};
use crate::stores::RemovalCounter;
use parking_lot::RwLock;

/// Out-of-band state of the pattern database: the removal counter and the
/// identity of the backing file.
#[derive(Debug)]
pub struct DatabaseMetadata {
    removal_count: RemovalCounter,
    identity: RwLock<Option<FileId>>,
}

impl DatabaseMetadata {
    pub fn new() -> Self {
        Self {
            removal_count: RemovalCounter::new(REMOVAL_COUNT_INIT),
            identity: RwLock::new(None),
        }
    }

    pub fn removal_count(&self) -> &RemovalCounter {
        &self.removal_count
    }

    pub fn identity(&self) -> Option<FileId> {
        *self.identity.read()
    }

    pub fn set_identity(&self, id: FileId) {
        *self.identity.write() = Some(id);
    }

    /// Whether `id` is the backing database file.
    pub fn is_database(&self, id: FileId) -> bool {
        self.identity() == Some(id)
    }
}

impl Default for DatabaseMetadata {
    fn default() -> Self {
        Self::new()
    }
}
