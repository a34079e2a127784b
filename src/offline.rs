use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{EngineEvent, EventBus};
use crate::gateway::RemoteGateway;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const PROBE_INTERVAL_SECS: u64 = 30;

/// Process-wide offline state. `started_at`/`stopped_at` bound the most
/// recent offline period and scope the post-reconnect reconciliation window.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineState {
    pub enabled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Writer half. Held only by the connectivity monitor; the sync engine never
/// mutates offline state.
#[derive(Clone, Default)]
pub struct OfflineHandle {
    state: Arc<RwLock<OfflineState>>,
}

impl OfflineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> OfflineReader {
        OfflineReader {
            state: self.state.clone(),
        }
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, OfflineState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns true when this call transitioned the state.
    pub fn set_offline(&self, at: DateTime<Utc>) -> bool {
        let mut state = self.write_lock();
        if state.enabled {
            return false;
        }
        state.enabled = true;
        state.started_at = Some(at);
        state.stopped_at = None;
        true
    }

    /// Returns true when this call transitioned the state.
    pub fn set_online(&self, at: DateTime<Utc>) -> bool {
        let mut state = self.write_lock();
        if !state.enabled {
            return false;
        }
        state.enabled = false;
        state.stopped_at = Some(at);
        true
    }
}

/// Read-only snapshot accessor injected into the services.
#[derive(Clone)]
pub struct OfflineReader {
    state: Arc<RwLock<OfflineState>>,
}

impl OfflineReader {
    pub fn snapshot(&self) -> OfflineState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.snapshot().enabled
    }
}

/// Periodically probes the gateway and flips offline state on transitions,
/// emitting `Offline` / `ConnectionRestored` events for subscribers.
pub struct ConnectivityMonitor {
    gateway: Arc<dyn RemoteGateway>,
    handle: OfflineHandle,
    events: EventBus,
    probe_interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(gateway: Arc<dyn RemoteGateway>, handle: OfflineHandle, events: EventBus) -> Self {
        Self {
            gateway,
            handle,
            events,
            probe_interval: Duration::from_secs(PROBE_INTERVAL_SECS),
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe().await;
                }
                _ = cancel.cancelled() => {
                    log_info!("connectivity monitor shutting down");
                    break;
                }
            }
        }
    }

    /// One connectivity check. Public so hosts can force a probe, e.g. after
    /// the OS reports a network change.
    pub async fn probe(&self) {
        let now = Utc::now();
        match self.gateway.ping().await {
            Ok(()) => {
                if self.handle.set_online(now) {
                    let snapshot = self.handle.reader().snapshot();
                    log_info!("connection restored");
                    self.events.emit(EngineEvent::ConnectionRestored {
                        offline_started_at: snapshot.started_at,
                        offline_stopped_at: now,
                    });
                }
            }
            Err(err) => {
                if self.handle.set_offline(now) {
                    log_warn!("going offline: {err:#}");
                    self.events.emit(EngineEvent::Offline { since: now });
                }
            }
        }
    }
}
