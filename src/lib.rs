pub mod auth;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod offline;
pub mod services;
pub mod sync;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use auth::UserContext;
use db::Database;
use events::{EngineEvent, EventBus};
use gateway::RemoteGateway;
use offline::{ConnectivityMonitor, OfflineHandle, OfflineReader};
use services::{IntervalService, TimerService};
use sync::SyncWorker;

pub use db::models::{Activity, Interval, Screenshot, Timer};
pub use error::ServiceError;

/// Initialize logging (reads RUST_LOG env var).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

pub struct EngineConfig {
    pub db_path: PathBuf,
    pub sync_interval: Duration,
    pub probe_interval: Duration,
}

impl EngineConfig {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            sync_interval: Duration::from_secs(60),
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Wires the sync engine together: local store, offline monitor, services,
/// and the background sync worker. The host supplies the two external
/// collaborators — user context and remote gateway — and drives the periodic
/// capture tick itself via [`Engine::intervals`].
pub struct Engine {
    timers: TimerService,
    intervals: IntervalService,
    events: EventBus,
    offline: OfflineReader,
    cancel: CancellationToken,
}

impl Engine {
    pub fn start(
        config: EngineConfig,
        user: Arc<dyn UserContext>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Result<Self> {
        let db = Database::new(config.db_path)?;
        let events = EventBus::default();
        let offline_handle = OfflineHandle::new();
        let offline = offline_handle.reader();

        let timers = TimerService::new(db.clone(), user.clone(), offline.clone());
        let intervals = IntervalService::new(
            db,
            user,
            offline.clone(),
            gateway.clone(),
            timers.clone(),
        );

        let cancel = CancellationToken::new();

        ConnectivityMonitor::new(gateway.clone(), offline_handle, events.clone())
            .with_probe_interval(config.probe_interval)
            .spawn(cancel.child_token());

        SyncWorker::new(
            timers.clone(),
            intervals.clone(),
            gateway,
            offline.clone(),
            events.clone(),
        )
        .with_pass_interval(config.sync_interval)
        .spawn(cancel.child_token());

        Ok(Self {
            timers,
            intervals,
            events,
            offline,
            cancel,
        })
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    pub fn intervals(&self) -> &IntervalService {
        &self.intervals
    }

    pub fn offline(&self) -> &OfflineReader {
        &self.offline
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stops the background loops. Records already persisted stay in the
    /// local store and sync on the next start.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
