#![forbid(unsafe_code)]

//! Administrative access to the pattern database of a running guard.
//!
//! [`ControlChannel`] holds the operations. [`ControlServer`] exposes them
//! on a Unix socket as length-delimited `rkyv` frames and
//! [`ControlClient`] drives them from another process.

mod channel;
mod client;
mod protocol;
mod server;

pub use channel::ControlChannel;
pub use client::ControlClient;
pub use protocol::{FailureKind, MAX_FRAME_LEN, Request, Response, StatusReport};
pub use server::ControlServer;

use std::path::{Path, PathBuf};

/// Socket a guard for `mount_point` listens on inside `runtime_dir`.
///
/// ```
/// use guard::control::socket_path;
/// use std::path::Path;
///
/// let path = socket_path(Path::new("/run/amguard"), Path::new("/srv/data/"));
/// assert_eq!(path, Path::new("/run/amguard/srv-data.sock"));
/// let root = socket_path(Path::new("/run/amguard"), Path::new("/"));
/// assert_eq!(root, Path::new("/run/amguard/-.sock"));
/// ```
pub fn socket_path(runtime_dir: &Path, mount_point: &Path) -> PathBuf {
    let mount = mount_point.to_string_lossy();
    let trimmed = mount.trim_matches('/');
    let escaped = if trimmed.is_empty() {
        "-".to_owned()
    } else {
        trimmed.replace('/', "-")
    };
    runtime_dir.join(format!("{escaped}.sock"))
}
