use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recording session: a continuous period of active tracking for an
/// employee. `stopped_at == None` means the timer is still running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: Option<i64>,
    /// Assigned by the remote service on first successful sync. Its presence
    /// is the source of truth for "has this record been synced".
    pub remote_id: Option<String>,
    pub employee_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub synced: bool,
    pub is_started_offline: bool,
    pub is_stopped_offline: bool,
}

impl Timer {
    pub fn new(employee_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            remote_id: None,
            employee_id: employee_id.into(),
            started_at,
            stopped_at: None,
            synced: false,
            is_started_offline: false,
            is_stopped_offline: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.stopped_at.is_none()
    }
}
