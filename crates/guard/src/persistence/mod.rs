#![forbid(unsafe_code)]

mod chunked_writer;
mod metadata;
mod pattern_db;

pub use chunked_writer::ChunkedWriter;
pub use metadata::DatabaseMetadata;
pub use pattern_db::{DbOptions, LoadReport, PatternDb, read_patterns};
