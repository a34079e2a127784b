use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Typed notifications the engine pushes to whatever hosts it. Replaces
/// callback-style observers: subscribers pull from a broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Offline {
        since: DateTime<Utc>,
    },
    ConnectionRestored {
        offline_started_at: Option<DateTime<Utc>>,
        offline_stopped_at: DateTime<Utc>,
    },
    TimerSynced {
        timer_id: i64,
        remote_id: String,
    },
    IntervalSynced {
        interval_id: i64,
        remote_id: String,
    },
    /// Pending-sync backlog after a pass, using the fallback counting
    /// semantics (interval count, or timer count when intervals are drained).
    SyncProgress {
        pending: u64,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emitting with no live subscribers is fine; events are notifications,
    /// not commands.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
