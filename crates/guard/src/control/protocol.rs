#![forbid(unsafe_code)]

use crate::error::Error;
use bytes::Bytes;
use rkyv::rancor;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// Largest control frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidInput,
    AlreadyExists,
    NotFound,
    BufferTooSmall,
    Io,
    Internal,
}

impl FailureKind {
    pub fn of(err: &Error) -> Self {
        match err {
            Error::InvalidInput(_) => FailureKind::InvalidInput,
            Error::AlreadyExists => FailureKind::AlreadyExists,
            Error::NotFound => FailureKind::NotFound,
            Error::BufferTooSmall { .. } => FailureKind::BufferTooSmall,
            Error::Io(_)
            | Error::Attribute { .. }
            | Error::RenameOrder(_)
            | Error::Unsynced { .. }
            | Error::Os(_) => FailureKind::Io,
            Error::Remote { kind, .. } => *kind,
            _ => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum Request {
    /// Serialized length of the pattern list.
    Count,
    /// The serialized pattern list, if it fits in `capacity` bytes.
    List { capacity: u64 },
    Add { pattern: Vec<u8> },
    Remove { pattern: Vec<u8> },
    /// Write the patterns back to the database file.
    Flush,
    Status,
}

impl Request {
    /// Short name for logs. Pattern bytes are never logged.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Count => "count",
            Request::List { .. } => "list",
            Request::Add { .. } => "add",
            Request::Remove { .. } => "remove",
            Request::Flush => "flush",
            Request::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct StatusReport {
    pub database: String,
    pub patterns: u64,
    pub serialized_len: u64,
    pub removal_count: u64,
    pub scans: u64,
    pub short_circuits: u64,
    pub denials: u64,
    pub attribute_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum Response {
    Count(u64),
    Patterns(Vec<u8>),
    Added,
    Removed { removal_count: u64 },
    Flushed,
    Status(StatusReport),
    Failed { kind: FailureKind, message: String },
}

impl Response {
    pub fn failed(err: &Error) -> Self {
        Response::Failed {
            kind: FailureKind::of(err),
            message: err.to_string(),
        }
    }
}

macro_rules! frame_codec {
    ($ty:ty) => {
        impl $ty {
            pub fn encode(&self) -> Result<Bytes, Error> {
                let bytes: Vec<u8> = rkyv::to_bytes::<rancor::Error>(self)
                    .map_err(|err| Error::Codec(err.to_string()))?
                    .into();
                Ok(Bytes::from(bytes))
            }

            pub fn decode(frame: &[u8]) -> Result<Self, Error> {
                // frames off the socket carry no alignment guarantee
                let mut aligned = AlignedVec::<16>::with_capacity(frame.len());
                aligned.extend_from_slice(frame);
                rkyv::from_bytes::<Self, rancor::Error>(&aligned)
                    .map_err(|err| Error::Codec(err.to_string()))
            }
        }
    };
}

frame_codec!(Request);
frame_codec!(Response);

pub(crate) fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
