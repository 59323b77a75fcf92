#![forbid(unsafe_code)]

use crate::error::Error;
use std::fmt;
use std::os::fd::AsFd;

/// Stable identity of a file: device and inode number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

impl FileId {
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identity of an open file.
    pub fn of(fd: impl AsFd) -> Result<Self, Error> {
        let stat = nix::sys::stat::fstat(fd)?;
        Ok(Self {
            dev: stat.st_dev as u64,
            ino: stat.st_ino as u64,
        })
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({}:{})", self.dev, self.ino)
    }
}
