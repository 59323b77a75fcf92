#![forbid(unsafe_code)]

mod pattern_store;
mod removal_counter;

pub use pattern_store::PatternStore;
pub use removal_counter::RemovalCounter;
