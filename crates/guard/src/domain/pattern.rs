#![forbid(unsafe_code)]

use crate::error::Error;
use std::fmt;

/// Longest pattern accepted anywhere in the system.
pub const MAX_PATTERN_LEN: usize = 256;

/// Number of buckets of the pattern index, one per printable ASCII byte.
pub const BUCKET_COUNT: usize = 96;

/// Bucket of a pattern starting with `first`.
///
/// Printable ASCII (`0x20..=0x7f`) maps to buckets `0..96` in byte order.
/// Other bytes wrap around into the same range.
///
/// # Examples
///
/// ```
/// # use guard::domain::bucket_index;
/// assert_eq!(bucket_index(b' '), 0);
/// assert_eq!(bucket_index(b'e'), b'e' as usize - 32);
/// assert_eq!(bucket_index(0x7f), 95);
/// assert!(bucket_index(0xff) < 96);
/// ```
#[inline]
pub const fn bucket_index(first: u8) -> usize {
    (first as usize + BUCKET_COUNT - 32) % BUCKET_COUNT
}

/// An immutable byte string identifying malicious content.
///
/// Always 1 to [`MAX_PATTERN_LEN`] bytes long and free of newlines, since the
/// newline separates records in the on-disk database.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern(Box<[u8]>);

impl Pattern {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::InvalidInput("pattern is empty".into()));
        }
        if bytes.len() > MAX_PATTERN_LEN {
            return Err(Error::InvalidInput(format!(
                "pattern is {} bytes long, at most {MAX_PATTERN_LEN} allowed",
                bytes.len()
            )));
        }
        if bytes.contains(&b'\n') {
            return Err(Error::InvalidInput("pattern contains a newline".into()));
        }
        Ok(Self(bytes.into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the on-disk record, pattern plus newline.
    pub fn record_len(&self) -> usize {
        self.0.len() + 1
    }

    pub fn bucket(&self) -> usize {
        bucket_index(self.0[0])
    }

    /// Whether the pattern occurs anywhere in `haystack`.
    #[inline]
    pub fn occurs_in(&self, haystack: &[u8]) -> bool {
        haystack.len() >= self.0.len() && haystack.windows(self.0.len()).any(|w| w == &*self.0)
    }
}

impl TryFrom<&[u8]> for Pattern {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Pattern {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes())
    }
}

impl AsRef<[u8]> for Pattern {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
