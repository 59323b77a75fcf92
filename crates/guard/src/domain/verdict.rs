#![forbid(unsafe_code)]

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Open,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The content matched a pattern, now or at the last scan.
    Tainted,
    /// Raw access to the pattern database itself.
    DatabaseFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Collapse into the outcome an end user sees. The deny reason never
    /// reaches the caller.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(_) => Err(Error::PermissionDenied),
        }
    }
}
