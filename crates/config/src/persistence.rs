use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Persistence {
    /// Flush the in-memory pattern database back to disk every interval.
    /// Absent or zero disables autosave. **Measured in seconds**.
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub autosave_interval: Option<Duration>,

    /// Flush the pattern database when the service shuts down.
    pub save_on_shutdown: bool,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            autosave_interval: None,
            save_on_shutdown: true,
        }
    }
}
