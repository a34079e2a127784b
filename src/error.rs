use thiserror::Error;

/// Write-path failures surfaced by the services. Read paths degrade to safe
/// defaults instead; only creates/updates/deletes reach this type so the sync
/// scheduler can observe and retry them.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("[TIMER_SERVICE] {0}")]
    Timer(anyhow::Error),
    #[error("[INTERVAL_SERVICE] {0}")]
    Interval(anyhow::Error),
}

impl ServiceError {
    pub fn timer(err: impl Into<anyhow::Error>) -> Self {
        Self::Timer(err.into())
    }

    pub fn interval(err: impl Into<anyhow::Error>) -> Self {
        Self::Interval(err.into())
    }
}
