use std::sync::Arc;

use anyhow::anyhow;
use log::warn;

use crate::auth::UserContext;
use crate::db::{Database, Timer};
use crate::error::ServiceError;
use crate::offline::OfflineReader;

/// Orchestrates the lifecycle of the current recording session. At most one
/// timer per employee may be running; this service is the single writer
/// through which timer rows are mutated.
///
/// Read paths swallow failures and resolve to safe defaults so a degraded
/// store never takes the UI down with it. Write paths re-throw wrapped as
/// [`ServiceError`].
#[derive(Clone)]
pub struct TimerService {
    db: Database,
    user: Arc<dyn UserContext>,
    offline: OfflineReader,
}

impl TimerService {
    pub fn new(db: Database, user: Arc<dyn UserContext>, offline: OfflineReader) -> Self {
        Self { db, user, offline }
    }

    async fn employee_id(&self) -> Option<String> {
        self.user.retrieve().await.map(|user| user.employee_id)
    }

    pub async fn find_last_one(&self) -> Option<Timer> {
        let employee = self.employee_id().await?;
        match self.db.find_last_timer(&employee).await {
            Ok(timer) => timer,
            Err(err) => {
                warn!("failed to load last timer: {err:#}");
                None
            }
        }
    }

    /// Most recent timer that owns capture data.
    pub async fn find_last_capture(&self) -> Option<Timer> {
        let employee = self.employee_id().await?;
        match self.db.find_last_capture_timer(&employee).await {
            Ok(timer) => timer,
            Err(err) => {
                warn!("failed to load last capture timer: {err:#}");
                None
            }
        }
    }

    pub async fn find_all(&self) -> Vec<Timer> {
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };
        match self.db.find_all_timers(&employee).await {
            Ok(timers) => timers,
            Err(err) => {
                warn!("failed to list timers: {err:#}");
                Vec::new()
            }
        }
    }

    pub async fn find_by_id(&self, timer: &Timer) -> Option<Timer> {
        let Some(id) = timer.id else {
            warn!("find_by_id called without a timer id");
            return None;
        };
        match self.db.find_timer_by_id(id).await {
            Ok(found) => found,
            Err(err) => {
                warn!("failed to load timer {id}: {err:#}");
                None
            }
        }
    }

    /// Persists a new timer. A missing record or employee id is a logged
    /// no-op; a second running timer for the same employee is refused.
    pub async fn save(&self, timer: Option<Timer>) -> Result<Option<Timer>, ServiceError> {
        let Some(mut timer) = timer else {
            warn!("save called without a timer; skipping");
            return Ok(None);
        };
        if timer.employee_id.is_empty() {
            warn!("save called without an employee id; skipping");
            return Ok(None);
        }

        // Stamp the start boundary so the sync pass can report it upstream.
        if timer.id.is_none() && timer.is_running() && self.offline.enabled() {
            timer.is_started_offline = true;
        }

        if timer.is_running() {
            let running = self
                .db
                .find_running_timer(&timer.employee_id)
                .await
                .map_err(ServiceError::timer)?;
            if let Some(running) = running {
                return Err(ServiceError::timer(anyhow!(
                    "employee {} already has a running timer (id {:?})",
                    timer.employee_id,
                    running.id
                )));
            }
        }

        let id = self
            .db
            .save_timer(&timer)
            .await
            .map_err(ServiceError::timer)?;
        timer.id = Some(id);
        Ok(Some(timer))
    }

    pub async fn update(&self, timer: &Timer) -> Result<(), ServiceError> {
        let Some(id) = timer.id else {
            warn!("update called without a timer id; skipping");
            return Ok(());
        };
        let mut record = timer.clone();
        // An unsynced timer stopped while offline is an interruption.
        if record.stopped_at.is_some() && !record.synced && self.offline.enabled() {
            record.is_stopped_offline = true;
        }
        self.db
            .update_timer(id, &record)
            .await
            .map_err(ServiceError::timer)
    }

    pub async fn remove(&self, timer: Option<&Timer>) -> Result<(), ServiceError> {
        let Some(id) = timer.and_then(|timer| timer.id) else {
            warn!("remove called without a timer id; skipping");
            return Ok(());
        };
        self.db
            .delete_timer(id)
            .await
            .map_err(ServiceError::timer)
    }

    /// Unsynced timers for the current employee, oldest first.
    pub async fn find_to_synced(&self) -> Vec<Timer> {
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };
        match self.db.find_timers_synced(false, &employee).await {
            Ok(timers) => timers,
            Err(err) => {
                warn!("failed to load unsynced timers: {err:#}");
                Vec::new()
            }
        }
    }

    /// Timers whose stop was recorded while the agent was offline.
    pub async fn interruptions(&self) -> Vec<Timer> {
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };
        match self.db.find_interrupted_timers(&employee).await {
            Ok(timers) => timers,
            Err(err) => {
                warn!("failed to load interrupted timers: {err:#}");
                Vec::new()
            }
        }
    }

    pub async fn count_no_synced(&self) -> u64 {
        let Some(employee) = self.employee_id().await else {
            return 0;
        };
        match self.db.count_timers(false, &employee).await {
            Ok(total) => total,
            Err(err) => {
                warn!("failed to count unsynced timers: {err:#}");
                0
            }
        }
    }
}
