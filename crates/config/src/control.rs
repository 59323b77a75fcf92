use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Control {
    /// Directory holding the administrative sockets, one per guarded mount
    /// point. `amguardctl` has to be pointed at the same directory.
    pub runtime_dir: PathBuf,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/run/amguard"),
        }
    }
}
