#![forbid(unsafe_code)]

mod fanotify_guard;

pub use fanotify_guard::{FanotifyGuard, InterceptOptions};
