#![deny(unsafe_code)]

use crate::fsops::AttributeStore;
use crate::error::Error;
use nix::errno::Errno;
use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd};

/// Attribute store backed by the file's extended attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct XattrStore;

impl XattrStore {
    fn c_name(name: &str) -> Result<CString, Error> {
        CString::new(name).map_err(|_| Error::Attribute {
            name: name.to_owned(),
            source: Errno::EINVAL,
        })
    }

    fn fail(name: &str, source: Errno) -> Error {
        Error::Attribute {
            name: name.to_owned(),
            source,
        }
    }
}

impl AttributeStore for XattrStore {
    fn get(&self, file: BorrowedFd<'_>, name: &str) -> Result<Option<Vec<u8>>, Error> {
        let c_name = Self::c_name(name)?;
        let fd = file.as_raw_fd();
        loop {
            #[allow(unsafe_code)]
            let size = unsafe { libc::fgetxattr(fd, c_name.as_ptr(), std::ptr::null_mut(), 0) };
            if size < 0 {
                return match Errno::last() {
                    Errno::ENODATA => Ok(None),
                    errno => Err(Self::fail(name, errno)),
                };
            }

            let mut buf = vec![0u8; size as usize];
            #[allow(unsafe_code)]
            let read = unsafe {
                libc::fgetxattr(fd, c_name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
            };
            if read < 0 {
                match Errno::last() {
                    // grew between the two calls
                    Errno::ERANGE => continue,
                    Errno::ENODATA => return Ok(None),
                    errno => return Err(Self::fail(name, errno)),
                }
            }
            buf.truncate(read as usize);
            return Ok(Some(buf));
        }
    }

    fn set(&self, file: BorrowedFd<'_>, name: &str, value: &[u8]) -> Result<(), Error> {
        let c_name = Self::c_name(name)?;
        #[allow(unsafe_code)]
        let ret = unsafe {
            libc::fsetxattr(
                file.as_raw_fd(),
                c_name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                0,
            )
        };
        if ret < 0 {
            return Err(Self::fail(name, Errno::last()));
        }
        Ok(())
    }

    fn remove(&self, file: BorrowedFd<'_>, name: &str) -> Result<(), Error> {
        let c_name = Self::c_name(name)?;
        #[allow(unsafe_code)]
        let ret = unsafe { libc::fremovexattr(file.as_raw_fd(), c_name.as_ptr()) };
        if ret < 0 {
            return match Errno::last() {
                Errno::ENODATA => Ok(()),
                errno => Err(Self::fail(name, errno)),
            };
        }
        Ok(())
    }
}
