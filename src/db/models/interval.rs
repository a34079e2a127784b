use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single recorded activity inside an interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub title: String,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

/// A captured screenshot carried inside an interval payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    /// Base64-encoded image data.
    pub data: String,
    pub captured_at: DateTime<Utc>,
}

/// A fixed time slice of recorded work, the unit of sync.
///
/// The `activities`/`screenshots` payload is immutable after creation; the
/// only permitted mutation is the synced-flag transition performed by
/// `IntervalService::synced`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub id: Option<i64>,
    pub remote_id: Option<String>,
    pub employee_id: String,
    /// The recording session this slice belongs to, when known.
    pub timer_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub activities: Vec<Activity>,
    pub screenshots: Vec<Screenshot>,
    pub synced: bool,
}

impl Interval {
    pub fn new(
        employee_id: impl Into<String>,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            remote_id: None,
            employee_id: employee_id.into(),
            timer_id: None,
            started_at,
            stopped_at,
            activities: Vec::new(),
            screenshots: Vec::new(),
            synced: false,
        }
    }
}
