use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monitor model - a configured target/check-type pair that is
/// periodically probed. Created and edited by an external management
/// surface; read-only inside this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    /// Target host (optionally `host:port` for TCP checks).
    pub hostname: String,
    /// Discriminates which registered checker is invoked.
    pub check_type: String,
    pub interval_seconds: u64,
    /// Consecutive failures tolerated (as PENDING) before a heartbeat
    /// is recorded DOWN.
    pub max_retries: u64,
    /// Display weight; monitor lists sort by weight descending.
    pub weight: i64,
    pub user_id: i64,
    pub active: bool,
}

impl Monitor {
    /// Full JSON view used by the per-user monitor list event.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
