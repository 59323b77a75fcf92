use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Attributes {
    /// Prefix of every extended attribute the service stores. It has to live
    /// in a namespace the service may write, `user.` on most filesystems.
    pub namespace: String,
}

impl Attributes {
    /// Name of the per-file taint record.
    pub fn taint(&self) -> String {
        format!("{}.taint", self.namespace)
    }

    /// Name of the removal counter stored on the pattern database.
    pub fn removal_count(&self) -> String {
        format!("{}.removal_count", self.namespace)
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            namespace: "user.amguard".into(),
        }
    }
}
