#![forbid(unsafe_code)]

use crate::domain::{Access, DenyReason, Verdict};
use crate::error::Error;
use crate::taint::{Content, TaintCache};
use nix::sys::fanotify::{
    EventFFlags, Fanotify, FanotifyEvent, FanotifyResponse, InitFlags, MarkFlags, MaskFlags,
    Response,
};
use std::fs::File;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const IDLE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterceptOptions {
    /// Also gate reads, not only opens.
    pub on_access: bool,
}

impl From<&config::Intercept> for InterceptOptions {
    fn from(intercept: &config::Intercept) -> Self {
        Self {
            on_access: intercept.on_access,
        }
    }
}

/// Gates opens under a mount point with fanotify permission events.
///
/// Every permission event is answered, including the ones that fail to be
/// checked. Writes are scanned when the writer closes the file, so the
/// taint record is in place before the next open.
pub struct FanotifyGuard {
    mount_point: PathBuf,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FanotifyGuard {
    pub fn start(
        mount_point: &Path,
        taint: Arc<TaintCache>,
        options: InterceptOptions,
    ) -> Result<Self, Error> {
        let fan = Fanotify::init(
            InitFlags::FAN_CLOEXEC | InitFlags::FAN_CLASS_CONTENT | InitFlags::FAN_NONBLOCK,
            EventFFlags::O_RDONLY | EventFFlags::O_CLOEXEC | EventFFlags::O_LARGEFILE,
        )
        .inspect_err(|err| warn!(?err, "fanotify init failed (need CAP_SYS_ADMIN)"))?;

        let mut mask = MaskFlags::FAN_OPEN_PERM | MaskFlags::FAN_CLOSE_WRITE;
        if options.on_access {
            mask |= MaskFlags::FAN_ACCESS_PERM;
        }
        let root = File::open(mount_point)?;
        fan.mark(
            MarkFlags::FAN_MARK_ADD | MarkFlags::FAN_MARK_MOUNT,
            mask,
            &root,
            None::<&Path>,
        )?;

        let stop = Arc::new(AtomicBool::new(false));
        let gate = Gate {
            taint,
            mount_point: mount_point.to_path_buf(),
            self_pid: std::process::id() as i32,
        };
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("fanotify-guard".into())
                .spawn(move || reader_loop(fan, gate, stop))?
        };

        info!(mount = %mount_point.display(), ?options, "interception started");
        Ok(Self {
            mount_point: mount_point.to_path_buf(),
            stop,
            handle: Some(handle),
        })
    }
}

fn reader_loop(fan: Fanotify, gate: Gate, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let events = match fan.read_events() {
            Ok(events) => events,
            Err(nix::errno::Errno::EAGAIN) => {
                std::thread::sleep(IDLE_BACKOFF);
                continue;
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => {
                warn!(?err, "fanotify read_events failed, interception stopped");
                break;
            }
        };

        for event in &events {
            handle_event(&fan, &gate, event);
        }
    }
    trace!("fanotify reader loop exited");
}

fn handle_event(fan: &Fanotify, gate: &Gate, event: &FanotifyEvent) {
    let Some(fd) = event.fd() else {
        warn!("fanotify queue overflow, events lost");
        return;
    };
    let mask = event.mask();

    if mask.intersects(MaskFlags::FAN_OPEN_PERM | MaskFlags::FAN_ACCESS_PERM) {
        let access = if mask.contains(MaskFlags::FAN_ACCESS_PERM) {
            Access::Read
        } else {
            Access::Open
        };
        let verdict = gate.verdict(event.pid(), fd, access);
        let response = if verdict.is_allowed() {
            Response::FAN_ALLOW
        } else {
            log_denial(event.pid(), verdict);
            Response::FAN_DENY
        };
        if let Err(err) = fan.write_response(FanotifyResponse::new(fd, response)) {
            warn!(?err, "failed to answer permission event");
        }
    }

    if mask.contains(MaskFlags::FAN_CLOSE_WRITE) {
        // records the taint, no one to answer
        let _ = gate.verdict(event.pid(), fd, Access::Write);
    }
}

fn log_denial(pid: i32, verdict: Verdict) {
    let exe = procfs::process::Process::new(pid)
        .and_then(|process| process.exe())
        .map(|exe| exe.display().to_string())
        .unwrap_or_else(|_| "?".to_owned());
    match verdict {
        Verdict::Deny(DenyReason::DatabaseFile) => {
            info!(pid, exe, "denied raw access to pattern database")
        }
        _ => info!(pid, exe, "denied access to tainted file"),
    }
}

struct Gate {
    taint: Arc<TaintCache>,
    mount_point: PathBuf,
    self_pid: i32,
}

impl Gate {
    fn verdict(&self, pid: i32, fd: BorrowedFd<'_>, access: Access) -> Verdict {
        if pid == self.self_pid {
            return Verdict::Allow;
        }
        let file = match fd.try_clone_to_owned() {
            Ok(owned) => File::from(owned),
            Err(err) => {
                warn!(%err, pid, "cannot inspect file, denying");
                return Verdict::Deny(DenyReason::Tainted);
            }
        };
        match file.metadata() {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Verdict::Allow,
            Err(err) => {
                warn!(%err, pid, "cannot stat file, denying");
                return Verdict::Deny(DenyReason::Tainted);
            }
        }
        if !self.is_under_mount(fd) {
            return Verdict::Allow;
        }

        match self.taint.check(fd, access, Content::File(&file)) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(%err, pid, ?access, "scan failed, denying");
                Verdict::Deny(DenyReason::Tainted)
            }
        }
    }

    fn is_under_mount(&self, fd: BorrowedFd<'_>) -> bool {
        match std::fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd())) {
            Ok(path) => path.starts_with(&self.mount_point),
            Err(err) => {
                debug!(%err, "cannot resolve path, checking anyway");
                true
            }
        }
    }
}

impl std::fmt::Debug for FanotifyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanotifyGuard")
            .field("mount_point", &self.mount_point)
            .field("active", &!self.stop.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for FanotifyGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        debug!(mount = %self.mount_point.display(), "interception stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FileId, Pattern};
    use crate::fsops::MemoryAttributeStore;
    use crate::persistence::DatabaseMetadata;
    use crate::stores::PatternStore;
    use std::io::Write;
    use std::os::fd::AsFd;

    fn gate(mount_point: &Path, metadata: Arc<DatabaseMetadata>) -> Gate {
        let patterns = Arc::new(PatternStore::new());
        patterns.add(Pattern::try_from("evil").unwrap()).unwrap();
        let taint = Arc::new(TaintCache::new(
            patterns,
            metadata,
            Arc::new(MemoryAttributeStore::new()),
            "user.amguard.taint",
            4096,
        ));
        Gate {
            taint,
            mount_point: mount_point.to_path_buf(),
            self_pid: 1,
        }
    }

    #[test]
    fn bad_regular_file_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path(), Arc::new(DatabaseMetadata::new()));
        let mut file = tempfile::tempfile_in(dir.path()).unwrap();
        file.write_all(b"an eviltwin").unwrap();

        assert_eq!(
            gate.verdict(42, file.as_fd(), Access::Open),
            Verdict::Deny(DenyReason::Tainted)
        );
        assert_eq!(gate.taint.stats().scans(), 1);
    }

    #[test]
    fn own_pid_is_never_gated() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path(), Arc::new(DatabaseMetadata::new()));
        let mut file = tempfile::tempfile_in(dir.path()).unwrap();
        file.write_all(b"evil").unwrap();

        assert_eq!(gate.verdict(1, file.as_fd(), Access::Open), Verdict::Allow);
        assert_eq!(gate.taint.stats().scans(), 0);
    }

    #[test]
    fn directories_pass() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path(), Arc::new(DatabaseMetadata::new()));
        let handle = File::open(dir.path()).unwrap();

        assert_eq!(gate.verdict(42, handle.as_fd(), Access::Open), Verdict::Allow);
    }

    #[test]
    fn database_file_is_denied_to_others() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("pattern.db");
        std::fs::write(&db_path, "evil\n").unwrap();
        let db = File::open(&db_path).unwrap();
        let metadata = Arc::new(DatabaseMetadata::new());
        metadata.set_identity(FileId::of(&db).unwrap());
        let gate = gate(dir.path(), metadata);

        assert_eq!(
            gate.verdict(42, db.as_fd(), Access::Open),
            Verdict::Deny(DenyReason::DatabaseFile)
        );
    }

    #[test]
    fn files_outside_the_mount_pass() {
        let mount = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let gate = gate(mount.path(), Arc::new(DatabaseMetadata::new()));
        let path = elsewhere.path().join("sample");
        std::fs::write(&path, "evil").unwrap();
        let file = File::open(&path).unwrap();

        assert_eq!(gate.verdict(42, file.as_fd(), Access::Open), Verdict::Allow);
    }
}
