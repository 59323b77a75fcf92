#![deny(unsafe_code)]

pub mod control;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fsops;
pub mod interception;
pub mod persistence;
pub mod stores;
pub mod taint;

pub use control::{ControlChannel, ControlClient, ControlServer, FailureKind, StatusReport};
pub use domain::{Access, DenyReason, FileId, MAX_PATTERN_LEN, Pattern, Verdict};
pub use engine::{ControlEvent, GuardEngine, Services};
pub use error::Error;
pub use fsops::{AttributeStore, FileLock, ImmutableFlag, MemoryAttributeStore, NoopLock, XattrStore};
pub use interception::{FanotifyGuard, InterceptOptions};
pub use persistence::{DatabaseMetadata, DbOptions, LoadReport, PatternDb};
pub use stores::{PatternStore, RemovalCounter};
pub use taint::{Content, TaintCache, TaintStats};
