#![forbid(unsafe_code)]

use crate::domain::FileId;
use crate::error::Error;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::os::fd::BorrowedFd;

/// Key-value attributes scoped to one open file.
///
/// Every call may fail on its own; callers must not assume two calls are
/// applied together.
pub trait AttributeStore: Send + Sync {
    /// Read an attribute. `Ok(None)` means it is not set.
    fn get(&self, file: BorrowedFd<'_>, name: &str) -> Result<Option<Vec<u8>>, Error>;
    /// Create or replace an attribute.
    fn set(&self, file: BorrowedFd<'_>, name: &str, value: &[u8]) -> Result<(), Error>;
    /// Remove an attribute. Removing an absent attribute is not an error.
    fn remove(&self, file: BorrowedFd<'_>, name: &str) -> Result<(), Error>;
}

/// Attribute store kept in memory, keyed by file identity.
///
/// Used where extended attributes are unavailable, and in tests.
#[derive(Debug, Default)]
pub struct MemoryAttributeStore {
    entries: Mutex<FxHashMap<(FileId, String), Vec<u8>>>,
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn key(file: BorrowedFd<'_>, name: &str) -> Result<(FileId, String), Error> {
        let id = FileId::of(file).map_err(|err| match err {
            Error::Os(source) => Error::Attribute {
                name: name.to_owned(),
                source,
            },
            other => other,
        })?;
        Ok((id, name.to_owned()))
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn get(&self, file: BorrowedFd<'_>, name: &str) -> Result<Option<Vec<u8>>, Error> {
        let key = Self::key(file, name)?;
        Ok(self.entries.lock().get(&key).cloned())
    }

    fn set(&self, file: BorrowedFd<'_>, name: &str, value: &[u8]) -> Result<(), Error> {
        let key = Self::key(file, name)?;
        self.entries.lock().insert(key, value.to_vec());
        Ok(())
    }

    fn remove(&self, file: BorrowedFd<'_>, name: &str) -> Result<(), Error> {
        let key = Self::key(file, name)?;
        self.entries.lock().remove(&key);
        Ok(())
    }
}
