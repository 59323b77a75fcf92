#![forbid(unsafe_code)]

use crate::domain::{Access, DenyReason, FileId, TaintRecord, Verdict};
use crate::error::Error;
use crate::fsops::AttributeStore;
use crate::persistence::DatabaseMetadata;
use crate::stores::PatternStore;
use crate::taint::scan_file;
use std::fs::File;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Bytes a verdict is based on.
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    /// The bytes of one read or write request.
    Buffer(&'a [u8]),
    /// The whole file, read in chunks.
    File(&'a File),
}

#[derive(Debug, Default)]
pub struct TaintStats {
    scans: AtomicU64,
    short_circuits: AtomicU64,
    denials: AtomicU64,
    attribute_errors: AtomicU64,
}

impl TaintStats {
    /// Content scans performed.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Denials answered from a still valid taint record, without a scan.
    pub fn short_circuits(&self) -> u64 {
        self.short_circuits.load(Ordering::Relaxed)
    }

    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    /// Attribute reads or writes that failed and were treated as unset.
    pub fn attribute_errors(&self) -> u64 {
        self.attribute_errors.load(Ordering::Relaxed)
    }
}

/// Decides whether a file access needs a scan and records the outcome.
///
/// A file found bad carries a taint record stamped with the removal counter
/// of that moment. While the counter is unchanged the record alone denies
/// access. Once a pattern was removed the record is stale and the next
/// access scans again: still bad refreshes the stamp, clean drops the
/// record. Files without a record are scanned on every access.
pub struct TaintCache {
    patterns: Arc<PatternStore>,
    metadata: Arc<DatabaseMetadata>,
    attributes: Arc<dyn AttributeStore>,
    attr_name: String,
    read_chunk: usize,
    stats: TaintStats,
}

impl TaintCache {
    pub fn new(
        patterns: Arc<PatternStore>,
        metadata: Arc<DatabaseMetadata>,
        attributes: Arc<dyn AttributeStore>,
        attr_name: impl Into<String>,
        read_chunk: usize,
    ) -> Self {
        Self {
            patterns,
            metadata,
            attributes,
            attr_name: attr_name.into(),
            read_chunk,
            stats: TaintStats::default(),
        }
    }

    pub fn stats(&self) -> &TaintStats {
        &self.stats
    }

    /// Verdict for an access to `file` with the given content.
    ///
    /// Fails only when a whole-file scan cannot read the file.
    pub fn check(
        &self,
        file: BorrowedFd<'_>,
        access: Access,
        content: Content<'_>,
    ) -> Result<Verdict, Error> {
        match FileId::of(file) {
            Ok(id) if self.metadata.is_database(id) => {
                debug!(?access, "raw access to pattern database refused");
                return Ok(self.deny(DenyReason::DatabaseFile));
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "cannot identify file"),
        }

        // read before scanning, see RemovalCounter
        let current = self.metadata.removal_count().get();

        match self.read_record(file) {
            Some(record) if record.is_bad() => {
                if record.rc_snapshot == current {
                    trace!(?access, rc = current, "taint still valid");
                    self.stats.short_circuits.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.deny(DenyReason::Tainted));
                }
                if self.scan(content)? {
                    debug!(?access, old = record.rc_snapshot, rc = current, "file still bad");
                    self.write_record(file, TaintRecord::bad(current));
                    Ok(self.deny(DenyReason::Tainted))
                } else {
                    debug!(?access, "file no longer matches, clearing taint");
                    self.clear_record(file);
                    Ok(Verdict::Allow)
                }
            }
            _ => {
                if self.scan(content)? {
                    debug!(?access, rc = current, "file flagged bad");
                    self.write_record(file, TaintRecord::bad(current));
                    Ok(self.deny(DenyReason::Tainted))
                } else {
                    Ok(Verdict::Allow)
                }
            }
        }
    }

    /// Gate for the bytes just read from `file`.
    pub fn on_read(&self, file: BorrowedFd<'_>, buf: &[u8]) -> Result<(), Error> {
        self.check(file, Access::Read, Content::Buffer(buf))?
            .into_result()
    }

    /// Gate for the bytes about to be written to `file`.
    pub fn on_write(&self, file: BorrowedFd<'_>, buf: &[u8]) -> Result<(), Error> {
        self.check(file, Access::Write, Content::Buffer(buf))?
            .into_result()
    }

    /// Whether `file` carries a taint record that is still valid. Never scans.
    pub fn is_tainted(&self, file: BorrowedFd<'_>) -> bool {
        self.read_record(file).is_some_and(|record| {
            record.is_bad() && record.rc_snapshot == self.metadata.removal_count().get()
        })
    }

    fn deny(&self, reason: DenyReason) -> Verdict {
        self.stats.denials.fetch_add(1, Ordering::Relaxed);
        Verdict::Deny(reason)
    }

    fn scan(&self, content: Content<'_>) -> Result<bool, Error> {
        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        match content {
            Content::Buffer(buf) => Ok(self.patterns.contains_any(buf)),
            Content::File(file) => Ok(scan_file(&self.patterns, file, self.read_chunk)?),
        }
    }

    fn read_record(&self, file: BorrowedFd<'_>) -> Option<TaintRecord> {
        let raw = match self.attributes.get(file, &self.attr_name) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(%err, "failed to read taint record, rescanning");
                self.stats.attribute_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match TaintRecord::decode(&raw) {
            Ok(record) => Some(record),
            Err(reason) => {
                let err = Error::MalformedAttribute {
                    name: self.attr_name.clone(),
                    reason,
                };
                warn!(%err, "ignoring taint record");
                self.stats.attribute_errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn write_record(&self, file: BorrowedFd<'_>, record: TaintRecord) {
        if let Err(err) = self.attributes.set(file, &self.attr_name, &record.encode()) {
            warn!(%err, "failed to store taint record");
            self.stats.attribute_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn clear_record(&self, file: BorrowedFd<'_>) {
        if let Err(err) = self.attributes.remove(file, &self.attr_name) {
            warn!(%err, "failed to clear taint record");
            self.stats.attribute_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for TaintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaintCache")
            .field("attr_name", &self.attr_name)
            .field("read_chunk", &self.read_chunk)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Pattern, REMOVAL_COUNT_INIT};
    use crate::fsops::MemoryAttributeStore;
    use std::os::fd::AsFd;

    const ATTR: &str = "user.amguard.taint";

    struct Fixture {
        patterns: Arc<PatternStore>,
        metadata: Arc<DatabaseMetadata>,
        attributes: Arc<MemoryAttributeStore>,
        cache: TaintCache,
    }

    fn fixture(patterns: &[&str]) -> Fixture {
        let store = Arc::new(PatternStore::new());
        for p in patterns {
            store.add(Pattern::try_from(*p).unwrap()).unwrap();
        }
        let metadata = Arc::new(DatabaseMetadata::new());
        let attributes = Arc::new(MemoryAttributeStore::new());
        let cache = TaintCache::new(
            Arc::clone(&store),
            Arc::clone(&metadata),
            attributes.clone(),
            ATTR,
            4096,
        );
        Fixture {
            patterns: store,
            metadata,
            attributes,
            cache,
        }
    }

    fn record(f: &Fixture, file: &File) -> Option<TaintRecord> {
        f.attributes
            .get(file.as_fd(), ATTR)
            .unwrap()
            .map(|raw| TaintRecord::decode(&raw).unwrap())
    }

    #[test]
    fn clean_access_leaves_no_record() {
        let f = fixture(&["evil"]);
        let file = tempfile::tempfile().unwrap();

        f.cache.on_read(file.as_fd(), b"harmless").unwrap();
        assert_eq!(record(&f, &file), None);
        assert_eq!(f.cache.stats().scans(), 1);
    }

    #[test]
    fn bad_file_is_denied_without_rescan() {
        let f = fixture(&["evil"]);
        let file = tempfile::tempfile().unwrap();

        assert!(matches!(
            f.cache.on_write(file.as_fd(), b"eviltwin"),
            Err(Error::PermissionDenied)
        ));
        assert_eq!(record(&f, &file), Some(TaintRecord::bad(REMOVAL_COUNT_INIT)));

        for _ in 0..5 {
            let verdict = f
                .cache
                .check(file.as_fd(), Access::Read, Content::Buffer(b"anything"))
                .unwrap();
            assert_eq!(verdict, Verdict::Deny(DenyReason::Tainted));
        }
        assert_eq!(f.cache.stats().scans(), 1);
        assert_eq!(f.cache.stats().short_circuits(), 5);
        assert!(f.cache.is_tainted(file.as_fd()));
    }

    #[test]
    fn removal_invalidates_taint_once() {
        let f = fixture(&["evil"]);
        let file = tempfile::tempfile().unwrap();
        f.cache.on_write(file.as_fd(), b"eviltwin").unwrap_err();

        let evil = Pattern::try_from("evil").unwrap();
        f.patterns.remove(&evil).unwrap();
        f.metadata.removal_count().bump();
        assert!(!f.cache.is_tainted(file.as_fd()));

        f.cache.on_read(file.as_fd(), b"eviltwin").unwrap();
        assert_eq!(f.cache.stats().scans(), 2);
        assert_eq!(record(&f, &file), None);

        f.cache.on_read(file.as_fd(), b"eviltwin").unwrap();
        assert_eq!(f.cache.stats().scans(), 3);
    }

    #[test]
    fn stale_taint_is_restamped_when_still_bad() {
        let f = fixture(&["evil", "worm"]);
        let file = tempfile::tempfile().unwrap();
        f.cache.on_write(file.as_fd(), b"evil worm").unwrap_err();

        f.patterns.remove(&Pattern::try_from("evil").unwrap()).unwrap();
        let rc = f.metadata.removal_count().bump();

        f.cache.on_read(file.as_fd(), b"evil worm").unwrap_err();
        assert_eq!(record(&f, &file), Some(TaintRecord::bad(rc)));

        f.cache.on_read(file.as_fd(), b"evil worm").unwrap_err();
        assert_eq!(f.cache.stats().scans(), 2);
    }

    #[test]
    fn database_file_is_always_denied() {
        let f = fixture(&[]);
        let db = tempfile::tempfile().unwrap();
        f.metadata.set_identity(FileId::of(&db).unwrap());

        let verdict = f
            .cache
            .check(db.as_fd(), Access::Open, Content::File(&db))
            .unwrap();
        assert_eq!(verdict, Verdict::Deny(DenyReason::DatabaseFile));
        assert_eq!(f.cache.stats().scans(), 0);
    }

    #[test]
    fn malformed_record_is_treated_as_unset() {
        let f = fixture(&["evil"]);
        let file = tempfile::tempfile().unwrap();
        f.attributes.set(file.as_fd(), ATTR, b"junk").unwrap();

        f.cache.on_read(file.as_fd(), b"clean").unwrap();
        assert_eq!(f.cache.stats().scans(), 1);
        assert_eq!(f.cache.stats().attribute_errors(), 1);
    }

    struct FailingStore;

    impl AttributeStore for FailingStore {
        fn get(&self, _file: BorrowedFd<'_>, name: &str) -> Result<Option<Vec<u8>>, Error> {
            Err(Error::Attribute {
                name: name.into(),
                source: nix::Error::EIO,
            })
        }

        fn set(&self, _file: BorrowedFd<'_>, name: &str, _value: &[u8]) -> Result<(), Error> {
            Err(Error::Attribute {
                name: name.into(),
                source: nix::Error::EIO,
            })
        }

        fn remove(&self, _file: BorrowedFd<'_>, name: &str) -> Result<(), Error> {
            Err(Error::Attribute {
                name: name.into(),
                source: nix::Error::EIO,
            })
        }
    }

    #[test]
    fn attribute_failures_fail_towards_scanning() {
        let store = Arc::new(PatternStore::new());
        store.add(Pattern::try_from("evil").unwrap()).unwrap();
        let cache = TaintCache::new(
            store,
            Arc::new(DatabaseMetadata::new()),
            Arc::new(FailingStore),
            ATTR,
            4096,
        );
        let file = tempfile::tempfile().unwrap();

        assert!(cache.on_read(file.as_fd(), b"evil").is_err());
        assert!(cache.on_read(file.as_fd(), b"evil").is_err());
        cache.on_read(file.as_fd(), b"fine").unwrap();
        assert_eq!(cache.stats().scans(), 3);
    }

    #[test]
    fn whole_file_content_is_scanned() {
        use std::io::Write;

        let f = fixture(&["payload"]);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![b'.'; 100_000]).unwrap();
        file.write_all(b"payload").unwrap();

        let verdict = f
            .cache
            .check(file.as_fd(), Access::Open, Content::File(&file))
            .unwrap();
        assert_eq!(verdict, Verdict::Deny(DenyReason::Tainted));
    }
}
