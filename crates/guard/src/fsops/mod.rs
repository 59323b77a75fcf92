//! Filesystem primitives the core relies on: per-file attributes, the
//! immutable flag and the atomic replace of the database file.

mod attributes;
mod immutable;
mod rename;
mod xattr;

pub use attributes::{AttributeStore, MemoryAttributeStore};
pub use immutable::{FileLock, ImmutableFlag, NoopLock};
pub use rename::atomic_replace;
pub use xattr::XattrStore;
