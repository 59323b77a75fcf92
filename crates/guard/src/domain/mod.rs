#![forbid(unsafe_code)]

mod file_id;
mod pattern;
mod taint_record;
mod verdict;

pub use file_id::FileId;
pub use pattern::{BUCKET_COUNT, MAX_PATTERN_LEN, Pattern, bucket_index};
pub use taint_record::{REMOVAL_COUNT_INIT, TaintRecord, TaintStatus, decode_counter, encode_counter};
pub use verdict::{Access, DenyReason, Verdict};
