#![forbid(unsafe_code)]

use crate::control::FailureKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid pattern: {0}")]
    InvalidInput(String),

    #[error("pattern already exists")]
    AlreadyExists,

    #[error("pattern not found")]
    NotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("attribute `{name}` failed: {source}")]
    Attribute {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("malformed attribute `{name}`: {reason}")]
    MalformedAttribute { name: String, reason: String },

    #[error("permission denied")]
    PermissionDenied,

    #[error("list buffer too small: {required} bytes required, {capacity} provided")]
    BufferTooSmall { required: u64, capacity: u64 },

    #[error("rename refused: {0}")]
    RenameOrder(String),

    /// The rename happened but its directory entry may not be on disk yet.
    #[error("replaced {path} but failed to sync its directory: {source}")]
    Unsynced {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("system call failed: {0}")]
    Os(#[from] nix::Error),

    #[error("control message codec failed: {0}")]
    Codec(String),

    #[error("control request failed ({kind:?}): {message}")]
    Remote { kind: FailureKind, message: String },

    #[error("control channel closed by peer")]
    ChannelClosed,
}
