#![forbid(unsafe_code)]

use crate::control::{Request, Response, StatusReport};
use crate::domain::Pattern;
use crate::error::Error;
use crate::persistence::PatternDb;
use crate::stores::PatternStore;
use crate::taint::TaintCache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

/// The administrative operations on a guard's pattern database.
///
/// Mutations and flushes go through a single lane, so at most one of them
/// runs at a time and a flush never observes a half-applied change. Scans
/// on the data path do not take the lane.
pub struct ControlChannel {
    patterns: Arc<PatternStore>,
    db: Arc<PatternDb>,
    taint: Arc<TaintCache>,
    admin: Mutex<()>,
    changes: AtomicU64,
}

impl ControlChannel {
    pub fn new(patterns: Arc<PatternStore>, db: Arc<PatternDb>, taint: Arc<TaintCache>) -> Self {
        Self {
            patterns,
            db,
            taint,
            admin: Mutex::new(()),
            changes: AtomicU64::new(0),
        }
    }

    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.patterns
    }

    /// Number of successful adds and removes so far.
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    /// Bytes needed to hold the output of [`list_patterns`](Self::list_patterns).
    pub fn count_patterns(&self) -> u64 {
        self.patterns.total_serialized_length() as u64
    }

    /// The serialized pattern list. Fails when it does not fit in `capacity`.
    pub fn list_patterns(&self, capacity: u64) -> Result<Vec<u8>, Error> {
        let _lane = self.admin.lock();
        let required = self.count_patterns();
        if capacity < required {
            return Err(Error::BufferTooSmall { required, capacity });
        }
        Ok(self.patterns.serialize())
    }

    pub fn add_pattern(&self, bytes: &[u8]) -> Result<(), Error> {
        let pattern = Pattern::new(bytes)?;
        let _lane = self.admin.lock();
        match self.patterns.add(pattern) {
            Ok(()) => {
                self.changes.fetch_add(1, Ordering::Relaxed);
                info!(len = bytes.len(), "pattern added");
                Ok(())
            }
            Err(err) => {
                info!(%err, "pattern not added");
                Err(err)
            }
        }
    }

    /// Remove a pattern and return the new removal count.
    ///
    /// The counter is bumped only after the pattern left the store, then
    /// written to the database file. A failed write is logged; the in-memory
    /// counter already invalidates outstanding taint records.
    pub fn remove_pattern(&self, bytes: &[u8]) -> Result<u64, Error> {
        let pattern = Pattern::new(bytes)?;
        let _lane = self.admin.lock();
        if let Err(err) = self.patterns.remove(&pattern) {
            info!(%err, "pattern not removed");
            return Err(err);
        }
        let removal_count = self.db.metadata().removal_count().bump();
        self.changes.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.db.store_removal_count() {
            warn!(%err, removal_count, "failed to record removal count");
        }
        info!(len = bytes.len(), removal_count, "pattern removed");
        Ok(removal_count)
    }

    /// Write the store back to the database file.
    pub fn flush(&self) -> Result<(), Error> {
        let _lane = self.admin.lock();
        self.db.persist(&self.patterns).inspect_err(|err| {
            error!(%err, path = %self.db.path().display(), "flushing pattern database failed");
        })
    }

    pub fn status(&self) -> StatusReport {
        let stats = self.taint.stats();
        StatusReport {
            database: self.db.path().display().to_string(),
            patterns: self.patterns.len() as u64,
            serialized_len: self.count_patterns(),
            removal_count: self.db.metadata().removal_count().get(),
            scans: stats.scans(),
            short_circuits: stats.short_circuits(),
            denials: stats.denials(),
            attribute_errors: stats.attribute_errors(),
        }
    }

    /// Run one request. Failures are carried in the response.
    pub fn dispatch(&self, request: Request) -> Response {
        let result = match request {
            Request::Count => Ok(Response::Count(self.count_patterns())),
            Request::List { capacity } => self.list_patterns(capacity).map(Response::Patterns),
            Request::Add { pattern } => self.add_pattern(&pattern).map(|()| Response::Added),
            Request::Remove { pattern } => self
                .remove_pattern(&pattern)
                .map(|removal_count| Response::Removed { removal_count }),
            Request::Flush => self.flush().map(|()| Response::Flushed),
            Request::Status => Ok(Response::Status(self.status())),
        };
        result.unwrap_or_else(|err| Response::failed(&err))
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("patterns", &self.patterns)
            .field("db", &self.db)
            .finish()
    }
}
