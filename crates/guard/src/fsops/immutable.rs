#![deny(unsafe_code)]

use crate::error::Error;
use std::fs::File;
use std::os::fd::AsRawFd;
use tracing::trace;

/// `FS_IMMUTABLE_FL` from `linux/fs.h`.
const FS_IMMUTABLE_FL: libc::c_long = 0x0000_0010;

#[allow(unsafe_code)]
mod ioctl {
    nix::ioctl_read!(fs_ioc_getflags, b'f', 1, libc::c_long);
    nix::ioctl_write_ptr!(fs_ioc_setflags, b'f', 2, libc::c_long);
}

/// Locks a file against modification while the service holds it.
pub trait FileLock: Send + Sync {
    fn lock(&self, file: &File) -> Result<(), Error>;
    fn unlock(&self, file: &File) -> Result<(), Error>;
}

/// Toggles the inode immutable flag (`chattr +i`). Needs
/// `CAP_LINUX_IMMUTABLE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmutableFlag;

impl ImmutableFlag {
    fn flags(file: &File) -> Result<libc::c_long, Error> {
        let mut flags: libc::c_long = 0;
        #[allow(unsafe_code)]
        unsafe {
            ioctl::fs_ioc_getflags(file.as_raw_fd(), &mut flags)?;
        }
        Ok(flags)
    }

    fn set_flags(file: &File, flags: libc::c_long) -> Result<(), Error> {
        #[allow(unsafe_code)]
        unsafe {
            ioctl::fs_ioc_setflags(file.as_raw_fd(), &flags)?;
        }
        Ok(())
    }
}

impl FileLock for ImmutableFlag {
    fn lock(&self, file: &File) -> Result<(), Error> {
        let flags = Self::flags(file)?;
        trace!(flags, "setting immutable flag");
        Self::set_flags(file, flags | FS_IMMUTABLE_FL)
    }

    fn unlock(&self, file: &File) -> Result<(), Error> {
        let flags = Self::flags(file)?;
        if flags & FS_IMMUTABLE_FL == 0 {
            return Ok(());
        }
        trace!(flags, "clearing immutable flag");
        Self::set_flags(file, flags & !FS_IMMUTABLE_FL)
    }
}

/// Lock that does nothing, for filesystems without inode flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

impl FileLock for NoopLock {
    fn lock(&self, _file: &File) -> Result<(), Error> {
        Ok(())
    }

    fn unlock(&self, _file: &File) -> Result<(), Error> {
        Ok(())
    }
}
