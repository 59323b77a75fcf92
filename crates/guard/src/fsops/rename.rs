#![forbid(unsafe_code)]

use crate::error::Error;
use std::fs::File;
use std::path::{Path, absolute};
use tracing::debug;

/// Atomically replace `dst` with `src` and make the rename durable.
///
/// Readers observe either the old or the new `dst`, never a mix. Nothing is
/// renamed when `src` is an ancestor of `dst`, and the call fails when `dst`
/// is an ancestor of `src`, in both cases leaving the two paths untouched.
///
/// [`Error::Unsynced`] means `dst` already is the new file.
pub fn atomic_replace(src: &Path, dst: &Path) -> Result<(), Error> {
    let src_abs = absolute(src)?;
    let dst_abs = absolute(dst)?;

    if src_abs == dst_abs {
        return Ok(());
    }
    if dst_abs.starts_with(&src_abs) {
        return Err(Error::RenameOrder(format!(
            "source {} is an ancestor of target {}",
            src_abs.display(),
            dst_abs.display()
        )));
    }
    if src_abs.starts_with(&dst_abs) {
        return Err(Error::RenameOrder(format!(
            "target {} is an ancestor of source {}: directory not empty",
            dst_abs.display(),
            src_abs.display()
        )));
    }

    std::fs::rename(&src_abs, &dst_abs)?;
    debug!(src = %src_abs.display(), dst = %dst_abs.display(), "file replaced");

    sync_parent(&dst_abs).map_err(|source| Error::Unsynced {
        path: dst_abs.clone(),
        source,
    })
}

fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_target_content() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("pattern.db.tmp");
        let dst = dir.path().join("pattern.db");
        std::fs::write(&src, b"new\n").unwrap();
        std::fs::write(&dst, b"old\n").unwrap();

        atomic_replace(&src, &dst).unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"new\n");
        assert!(!src.exists());
    }

    #[test]
    fn refuses_ancestor_orderings() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("a");
        let child = parent.join("b");
        std::fs::create_dir_all(&child).unwrap();

        assert!(matches!(
            atomic_replace(&parent, &child),
            Err(Error::RenameOrder(_))
        ));
        assert!(matches!(
            atomic_replace(&child, &parent),
            Err(Error::RenameOrder(_))
        ));
        assert!(child.is_dir());
    }

    #[test]
    fn sync_parent_fails_without_directory() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone").join("pattern.db");
        assert!(sync_parent(&gone).is_err());
        assert!(sync_parent(&dir.path().join("pattern.db")).is_ok());
    }

    #[test]
    fn missing_source_is_io_error() {
        let dir = tempdir().unwrap();
        let res = atomic_replace(&dir.path().join("nope"), &dir.path().join("dst"));
        assert!(matches!(res, Err(Error::Io(_))));
    }
}
