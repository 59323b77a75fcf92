use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Intercept {
    /// Whether file accesses under the mount point are intercepted at all.
    /// Requires `CAP_SYS_ADMIN`. With interception off the service only
    /// manages the pattern database.
    pub enabled: bool,

    /// Gate every read as well, not only opens.
    ///
    /// ## Note
    ///
    /// Files flagged bad are answered without a scan, but clean files are
    /// scanned again on every read, which gets expensive quickly.
    pub on_access: bool,

    /// Size of the pieces a whole-file scan reads at a time. **Measured in
    /// bytes**.
    pub read_chunk: usize,
}

impl Default for Intercept {
    fn default() -> Self {
        Self {
            enabled: true,
            on_access: false,
            read_chunk: 64 * 1024,
        }
    }
}
