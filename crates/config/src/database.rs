use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest chunk that still holds one maximal record (256 bytes + newline).
pub const MIN_CHUNK_SIZE: usize = 257;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Database {
    /// Location of the pattern database. Patterns are stored one per line.
    ///
    /// A relative path is resolved against the guarded mount point, so the
    /// default places `pattern.db` at the root of the mount.
    pub path: PathBuf,

    /// Size of the chunks used to read the database at startup and to
    /// buffer the rewritten database before it hits the disk. **Measured in
    /// bytes**.
    ///
    /// ## Note
    ///
    /// Values below 257 bytes cannot hold a maximal pattern record and are
    /// raised to that minimum.
    pub chunk_size: usize,

    /// Keep the database immutable (`chattr +i`) while the service holds it,
    /// so nothing but the service can rewrite it.
    pub lock_immutable: bool,

    /// Create an empty database instead of refusing to start when the file
    /// does not exist.
    pub create_if_missing: bool,
}

impl Database {
    /// Resolve the database path against the guarded mount point.
    ///
    /// # Examples
    ///
    /// ```
    /// # use config::Database;
    /// # use std::path::Path;
    /// let mut db = Database::default();
    /// assert_eq!(db.resolve("/mnt/guarded"), Path::new("/mnt/guarded/pattern.db"));
    ///
    /// db.path = "/var/lib/amguard/pattern.db".into();
    /// assert_eq!(db.resolve("/mnt/guarded"), Path::new("/var/lib/amguard/pattern.db"));
    /// ```
    pub fn resolve(&self, mount_point: impl AsRef<Path>) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            mount_point.as_ref().join(&self.path)
        }
    }

    /// Chunk size clamped to [`MIN_CHUNK_SIZE`].
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(MIN_CHUNK_SIZE)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pattern.db"),
            chunk_size: 4096,
            lock_immutable: true,
            create_if_missing: false,
        }
    }
}
