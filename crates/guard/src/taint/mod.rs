#![forbid(unsafe_code)]

mod cache;
mod scan;

pub use cache::{Content, TaintCache, TaintStats};
pub use scan::scan_file;
