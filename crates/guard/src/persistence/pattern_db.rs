#![forbid(unsafe_code)]

use crate::domain::{
    FileId, MAX_PATTERN_LEN, Pattern, REMOVAL_COUNT_INIT, TaintRecord, decode_counter, encode_counter,
};
use crate::error::Error;
use crate::fsops::{AttributeStore, FileLock, atomic_replace};
use crate::persistence::{ChunkedWriter, DatabaseMetadata};
use crate::stores::PatternStore;
use config::Config;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbOptions {
    pub path: PathBuf,
    pub chunk_size: usize,
    pub create_if_missing: bool,
    pub removal_count_attr: String,
    pub taint_attr: String,
}

impl DbOptions {
    pub fn from_config(config: &Config, mount_point: &Path) -> Self {
        if config.database.chunk_size < config::MIN_CHUNK_SIZE {
            warn!(
                configured = config.database.chunk_size,
                used = config::MIN_CHUNK_SIZE,
                "database chunk size too small to hold a pattern, raising it"
            );
        }
        Self {
            path: config.database.resolve(mount_point),
            chunk_size: config.database.effective_chunk_size(),
            create_if_missing: config.database.create_if_missing,
            removal_count_attr: config.attributes.removal_count(),
            taint_attr: config.attributes.taint(),
        }
    }

    /// Sibling file the database is rewritten into before the swap.
    pub fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Outcome of reading a database file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub duplicates: usize,
    pub oversized: usize,
}

/// Persistence of the pattern index in its backing file.
///
/// The backing file stays open and locked against modification from
/// [`load`](Self::load) until [`close`](Self::close).
pub struct PatternDb {
    options: DbOptions,
    lock: Arc<dyn FileLock>,
    attributes: Arc<dyn AttributeStore>,
    metadata: Arc<DatabaseMetadata>,
    handle: Mutex<Option<File>>,
}

impl PatternDb {
    pub fn new(
        options: DbOptions,
        lock: Arc<dyn FileLock>,
        attributes: Arc<dyn AttributeStore>,
        metadata: Arc<DatabaseMetadata>,
    ) -> Self {
        Self {
            options,
            lock,
            attributes,
            metadata,
            handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn metadata(&self) -> &Arc<DatabaseMetadata> {
        &self.metadata
    }

    /// Read the backing file into a fresh store.
    ///
    /// Also records the identity of the file and seeds the removal counter
    /// when the file carries none yet.
    pub fn load(&self) -> Result<PatternStore, Error> {
        let file = self.open_backing_file()?;
        self.lock.unlock(&file)?;

        let loaded = self.load_unlocked(&file);
        let relocked = self.lock.lock(&file);
        let store = match loaded {
            Ok(store) => store,
            Err(err) => {
                if let Err(lock_err) = relocked {
                    warn!(%lock_err, "failed to relock pattern database");
                }
                return Err(err);
            }
        };
        relocked?;
        *self.handle.lock() = Some(file);
        Ok(store)
    }

    /// Rewrite the backing file from `store`.
    ///
    /// The patterns are written to a `.tmp` sibling which then replaces the
    /// backing file in one rename. On failure the backing file is left as it
    /// was and the temporary file is discarded. After [`Error::Unsynced`] the
    /// new file is already in place, locked and known as the database.
    pub fn persist(&self, store: &PatternStore) -> Result<(), Error> {
        let mut handle = self.handle.lock();
        if handle.is_none() && self.options.path.exists() {
            *handle = Some(File::open(&self.options.path)?);
        }
        if let Some(file) = handle.as_ref() {
            self.lock.unlock(file)?;
        }

        let swapped = self.write_and_swap(store);
        self.settle(&mut handle, swapped, store.total_serialized_length())
    }

    /// Adopt the outcome of a swap: the new file once it sits at the
    /// database path, the old one otherwise. Either way the adopted file
    /// ends up locked.
    fn settle(
        &self,
        handle: &mut Option<File>,
        swapped: Result<Swapped, Error>,
        bytes: usize,
    ) -> Result<(), Error> {
        match swapped {
            Ok(Swapped { file, unsynced }) => {
                let id = FileId::of(&file);
                let relocked = self.lock.lock(&file);
                *handle = Some(file);
                self.metadata.set_identity(id?);
                relocked?;
                if let Some(err) = unsynced {
                    warn!(%err, "pattern database swapped but not durable yet");
                    return Err(err);
                }
                info!(
                    path = %self.options.path.display(),
                    bytes,
                    "pattern database persisted"
                );
                Ok(())
            }
            Err(err) => {
                if let Some(file) = handle.as_ref() {
                    if let Err(lock_err) = self.lock.lock(file) {
                        warn!(%lock_err, "failed to relock pattern database");
                    }
                }
                let tmp = self.options.tmp_path();
                if tmp.exists() {
                    if let Err(rm_err) = std::fs::remove_file(&tmp) {
                        warn!(%rm_err, path = %tmp.display(), "failed to discard temporary database");
                    }
                }
                Err(err)
            }
        }
    }

    /// Write the current removal counter to the backing file.
    pub fn store_removal_count(&self) -> Result<(), Error> {
        let handle = self.handle.lock();
        let Some(file) = handle.as_ref() else {
            return Ok(());
        };
        self.lock.unlock(file)?;
        let value = encode_counter(self.metadata.removal_count().get());
        let res = self
            .attributes
            .set(file.as_fd(), &self.options.removal_count_attr, &value);
        self.lock.lock(file)?;
        res
    }

    /// Release the backing file. It stays locked on disk.
    pub fn close(&self) {
        if self.handle.lock().take().is_some() {
            debug!(path = %self.options.path.display(), "pattern database closed");
        }
    }

    fn open_backing_file(&self) -> Result<File, Error> {
        match File::open(&self.options.path) {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound && self.options.create_if_missing => {
                info!(path = %self.options.path.display(), "creating empty pattern database");
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o644)
                    .open(&self.options.path)?;
                Ok(File::open(&self.options.path)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn load_unlocked(&self, file: &File) -> Result<PatternStore, Error> {
        self.metadata.set_identity(FileId::of(file)?);
        self.seed_metadata(file);

        let store = PatternStore::new();
        let report = read_patterns(file, self.options.chunk_size, &store)?;
        info!(
            path = %self.options.path.display(),
            loaded = report.loaded,
            duplicates = report.duplicates,
            oversized = report.oversized,
            removal_count = self.metadata.removal_count().get(),
            "pattern database loaded"
        );
        Ok(store)
    }

    fn seed_metadata(&self, file: &File) {
        let name = &self.options.removal_count_attr;
        let counter = self.metadata.removal_count();
        match self.attributes.get(file.as_fd(), name) {
            Ok(Some(raw)) => match decode_counter(&raw) {
                Ok(value) => counter.set(value),
                Err(reason) => {
                    warn!(%reason, "malformed removal count, starting over");
                    counter.set(REMOVAL_COUNT_INIT);
                }
            },
            Ok(None) => {
                counter.set(REMOVAL_COUNT_INIT);
                if let Err(err) = self.attributes.set(
                    file.as_fd(),
                    name,
                    &encode_counter(REMOVAL_COUNT_INIT),
                ) {
                    warn!(%err, "failed to initialize removal count");
                }
            }
            Err(err) => {
                warn!(%err, "failed to read removal count");
                counter.set(REMOVAL_COUNT_INIT);
            }
        }

        let taint = &self.options.taint_attr;
        if let Ok(None) = self.attributes.get(file.as_fd(), taint) {
            let unmarked = TaintRecord::default().encode();
            if let Err(err) = self.attributes.set(file.as_fd(), taint, &unmarked) {
                warn!(%err, "failed to initialize status of pattern database");
            }
        }
    }

    fn write_and_swap(&self, store: &PatternStore) -> Result<Swapped, Error> {
        let tmp_path = self.options.tmp_path();
        let tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&tmp_path)?;

        let mut writer = ChunkedWriter::new(&tmp, self.options.chunk_size);
        store.try_for_each(|pattern| writer.write_record(&[pattern.as_bytes(), b"\n"]))?;
        let chunks = writer.chunks_written();
        writer.finish()?;
        tmp.sync_all()?;
        debug!(chunks, path = %tmp_path.display(), "temporary database written");

        let unsynced = match atomic_replace(&tmp_path, &self.options.path) {
            Ok(()) => None,
            Err(err @ Error::Unsynced { .. }) => Some(err),
            Err(err) => return Err(err),
        };

        let value = encode_counter(self.metadata.removal_count().get());
        if let Err(err) =
            self.attributes
                .set(tmp.as_fd(), &self.options.removal_count_attr, &value)
        {
            warn!(%err, "failed to store removal count on pattern database");
        }
        Ok(Swapped {
            file: tmp,
            unsynced,
        })
    }
}

/// A temporary file that now sits at the database path.
struct Swapped {
    file: File,
    unsynced: Option<Error>,
}

impl std::fmt::Debug for PatternDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternDb")
            .field("options", &self.options)
            .field("open", &self.handle.lock().is_some())
            .finish()
    }
}

/// Feed newline separated patterns from `reader` into `store`.
///
/// Reads at most `chunk_size` bytes at a time and carries partial lines over
/// chunk boundaries. Empty lines are skipped silently, lines longer than
/// [`MAX_PATTERN_LEN`] and duplicates are skipped with a log line.
pub fn read_patterns<R: Read>(
    mut reader: R,
    chunk_size: usize,
    store: &PatternStore,
) -> io::Result<LoadReport> {
    let mut report = LoadReport::default();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut line: Vec<u8> = Vec::with_capacity(MAX_PATTERN_LEN);
    // bytes of the current line beyond what is kept in `line`
    let mut overflow = 0usize;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        for &byte in &chunk[..n] {
            if byte == b'\n' {
                ingest_line(&line, overflow, store, &mut report);
                line.clear();
                overflow = 0;
            } else if line.len() < MAX_PATTERN_LEN {
                line.push(byte);
            } else {
                overflow += 1;
            }
        }
    }
    ingest_line(&line, overflow, store, &mut report);

    Ok(report)
}

fn ingest_line(line: &[u8], overflow: usize, store: &PatternStore, report: &mut LoadReport) {
    if line.is_empty() {
        return;
    }
    if overflow > 0 {
        warn!(
            len = line.len() + overflow,
            prefix = %String::from_utf8_lossy(&line[..16.min(line.len())]),
            "pattern too long, skipping"
        );
        report.oversized += 1;
        return;
    }
    let pattern = match Pattern::new(line) {
        Ok(p) => p,
        Err(err) => {
            warn!(%err, "skipping invalid pattern");
            return;
        }
    };
    match store.add(pattern) {
        Ok(()) => report.loaded += 1,
        Err(err) => {
            info!(%err, pattern = %String::from_utf8_lossy(line), "failed to add pattern");
            report.duplicates += 1;
        }
    }
}
