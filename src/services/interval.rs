use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;

use crate::auth::UserContext;
use crate::db::{Database, Interval, Screenshot};
use crate::error::ServiceError;
use crate::gateway::RemoteGateway;
use crate::offline::OfflineReader;
use crate::services::TimerService;

/// Orchestrates interval persistence and the idle-time reconciliation
/// algorithm. The capture tick writes every interval locally first,
/// unconditionally; the sync pass later flips the synced flag through
/// [`IntervalService::synced`], the only permitted payload mutation.
#[derive(Clone)]
pub struct IntervalService {
    db: Database,
    user: Arc<dyn UserContext>,
    offline: OfflineReader,
    gateway: Arc<dyn RemoteGateway>,
    timers: TimerService,
}

impl IntervalService {
    pub fn new(
        db: Database,
        user: Arc<dyn UserContext>,
        offline: OfflineReader,
        gateway: Arc<dyn RemoteGateway>,
        timers: TimerService,
    ) -> Self {
        Self {
            db,
            user,
            offline,
            gateway,
            timers,
        }
    }

    async fn employee_id(&self) -> Option<String> {
        self.user.retrieve().await.map(|user| user.employee_id)
    }

    /// Persists a freshly captured interval. Missing data is a logged no-op;
    /// store failures must stay visible to the capture loop and are
    /// re-thrown wrapped.
    pub async fn create(&self, interval: Option<Interval>) -> Result<Option<Interval>, ServiceError> {
        let Some(mut interval) = interval else {
            warn!("create called without interval data; skipping");
            return Ok(None);
        };
        if interval.employee_id.is_empty() {
            warn!("create called without an employee id; skipping");
            return Ok(None);
        }

        let id = self
            .db
            .save_interval(&interval)
            .await
            .map_err(ServiceError::interval)?;
        interval.id = Some(id);
        Ok(Some(interval))
    }

    /// Unsynced intervals backed up during the most recent offline period.
    pub async fn backed_up_no_synced(&self) -> Vec<Interval> {
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };
        let window = self.offline.snapshot();
        match self
            .db
            .backed_up_no_synced(window.started_at, window.stopped_at, &employee)
            .await
        {
            Ok(intervals) => intervals,
            Err(err) => {
                warn!("failed to load backed-up intervals: {err:#}");
                Vec::new()
            }
        }
    }

    /// All unsynced intervals regardless of window, oldest first.
    pub async fn backed_up_all_no_synced(&self) -> Vec<Interval> {
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };
        match self.db.backed_up_all_no_synced(&employee).await {
            Ok(intervals) => intervals,
            Err(err) => {
                warn!("failed to load unsynced intervals: {err:#}");
                Vec::new()
            }
        }
    }

    pub async fn destroy(&self, interval: Option<&Interval>) -> Result<(), ServiceError> {
        let Some(id) = interval.and_then(|interval| interval.id) else {
            warn!("destroy called without an interval id; skipping");
            return Ok(());
        };
        self.db
            .delete_interval(id)
            .await
            .map_err(ServiceError::interval)
    }

    /// The one synced-flag transition. The caller assigns `remote_id` after a
    /// successful upload and calls this exactly once per record; re-running it
    /// rewrites the same values and stays idempotent.
    pub async fn synced(&self, interval: &mut Interval) -> Result<(), ServiceError> {
        let Some(id) = interval.id else {
            warn!("synced called without an interval id; skipping");
            return Ok(());
        };
        interval.synced = true;
        self.db
            .update_interval(id, interval)
            .await
            .map_err(ServiceError::interval)
    }

    /// Pending-sync total for UI badges. Falls back to the timer backlog when
    /// no interval rows are outstanding, so a timer-only backlog still shows.
    pub async fn count_no_synced(&self) -> u64 {
        let Some(employee) = self.employee_id().await else {
            return 0;
        };
        let total = match self.db.count_intervals(false, &employee).await {
            Ok(total) => total,
            Err(err) => {
                warn!("failed to count unsynced intervals: {err:#}");
                return 0;
            }
        };
        if total == 0 {
            return self.timers.count_no_synced().await;
        }
        total
    }

    /// Screenshot references of the latest interval for the current employee.
    pub async fn screenshots(&self) -> Vec<Screenshot> {
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };
        match self.db.latest_screenshots(&employee).await {
            Ok(screenshots) => screenshots,
            Err(err) => {
                warn!("failed to load screenshots: {err:#}");
                Vec::new()
            }
        }
    }

    /// Most recent synced interval excluding the given local ids.
    pub async fn last_synced(&self, exclude_ids: &[i64]) -> Option<Interval> {
        let employee = self.employee_id().await?;
        match self.db.last_synced_interval(&employee, exclude_ids).await {
            Ok(interval) => interval,
            Err(err) => {
                warn!("failed to load last synced interval: {err:#}");
                None
            }
        }
    }

    /// Idle-time deletion, dispatched by connectivity.
    ///
    /// Offline: rows in the range are deleted locally only and `[]` is
    /// returned; the range is re-evaluated once online since copies may still
    /// exist remotely. Online: the gateway deletes the range and the returned
    /// `remote_id`s let the caller purge any remotely-keyed local views.
    /// Best-effort: every failure resolves to `[]`.
    pub async fn remove_idles_time(
        &self,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
    ) -> Vec<String> {
        let (Some(started_at), Some(stopped_at)) = (started_at, stopped_at) else {
            warn!("remove_idles_time called without a complete range; skipping");
            return Vec::new();
        };
        let Some(employee) = self.employee_id().await else {
            return Vec::new();
        };

        if self.offline.enabled() {
            if let Err(err) = self
                .db
                .delete_locally_idles_time(started_at, stopped_at, &employee)
                .await
            {
                warn!("local idle-time deletion failed: {err:#}");
            }
            return Vec::new();
        }

        match self
            .gateway
            .delete_idles_time(started_at, stopped_at, &employee)
            .await
        {
            Ok(removed) => removed.into_iter().map(|slot| slot.remote_id).collect(),
            Err(err) => {
                warn!("remote idle-time deletion failed: {err:#}");
                Vec::new()
            }
        }
    }

    /// Delete by local id. `None` (the untyped caller passed no numeric id)
    /// is a logged no-op.
    pub async fn remove(&self, id: Option<i64>) -> Result<(), ServiceError> {
        let Some(id) = id else {
            warn!("remove called without a numeric interval id; skipping");
            return Ok(());
        };
        self.db
            .delete_interval(id)
            .await
            .map_err(ServiceError::interval)
    }

    /// Delete by remote id after a successful remote deletion.
    pub async fn remove_by_remote_id(&self, remote_id: &str) -> Result<(), ServiceError> {
        if remote_id.is_empty() {
            warn!("remove_by_remote_id called with an empty remote id; skipping");
            return Ok(());
        }
        self.db
            .delete_interval_by_remote_id(remote_id)
            .await
            .map_err(ServiceError::interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticUserContext;
    use crate::db::models::{Activity, Timer};
    use crate::gateway::{RemoteTimeLog, RemovedTimeSlot};
    use crate::offline::OfflineHandle;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    pub(crate) struct MockGateway {
        pub removed: Vec<RemovedTimeSlot>,
        pub delete_calls: Mutex<u32>,
        pub fail_uploads: bool,
        pub upload_count: Mutex<u32>,
    }

    #[async_trait]
    impl RemoteGateway for MockGateway {
        async fn upload_interval(&self, interval: &Interval) -> Result<String> {
            if self.fail_uploads {
                return Err(anyhow!("gateway unavailable"));
            }
            let mut count = self.upload_count.lock().unwrap();
            *count += 1;
            Ok(format!("r-{}", interval.id.unwrap_or_default()))
        }

        async fn upload_timer(&self, timer: &Timer) -> Result<String> {
            if self.fail_uploads {
                return Err(anyhow!("gateway unavailable"));
            }
            let mut count = self.upload_count.lock().unwrap();
            *count += 1;
            Ok(format!("rt-{}", timer.id.unwrap_or_default()))
        }

        async fn delete_idles_time(
            &self,
            _started_at: DateTime<Utc>,
            _stopped_at: DateTime<Utc>,
            _employee_id: &str,
        ) -> Result<Vec<RemovedTimeSlot>> {
            *self.delete_calls.lock().unwrap() += 1;
            Ok(self.removed.clone())
        }

        async fn conflicts(
            &self,
            _started_at: DateTime<Utc>,
            _stopped_at: DateTime<Utc>,
            _employee_id: &str,
        ) -> Result<Vec<RemoteTimeLog>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) struct Fixture {
        pub db: Database,
        pub offline: OfflineHandle,
        pub gateway: Arc<MockGateway>,
        pub timers: TimerService,
        pub intervals: IntervalService,
        _dir: TempDir,
    }

    pub(crate) fn fixture_with_gateway(gateway: MockGateway) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("tracksync.sqlite3")).unwrap();
        let user: Arc<dyn UserContext> = Arc::new(StaticUserContext::new("e1"));
        let offline = OfflineHandle::new();
        let gateway = Arc::new(gateway);
        let timers = TimerService::new(db.clone(), user.clone(), offline.reader());
        let intervals = IntervalService::new(
            db.clone(),
            user,
            offline.reader(),
            gateway.clone(),
            timers.clone(),
        );
        Fixture {
            db,
            offline,
            gateway,
            timers,
            intervals,
            _dir: dir,
        }
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with_gateway(MockGateway::default())
    }

    pub(crate) fn interval_at(hour: u32) -> Interval {
        let started_at = Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0).unwrap();
        let mut interval = Interval::new("e1", started_at, started_at + Duration::minutes(10));
        interval.activities = vec![Activity {
            title: "IDE".into(),
            duration_secs: 600,
            app: None,
        }];
        interval
    }

    #[tokio::test]
    async fn offline_interval_stays_unsynced_until_synced_call() {
        let fx = fixture();
        fx.offline
            .set_offline(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap());

        let stored = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();
        assert!(!stored.synced);
        assert!(stored.remote_id.is_none());

        let row = fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().unwrap();
        assert!(!row.synced);
        assert!(row.remote_id.is_none());
    }

    #[tokio::test]
    async fn create_then_read_round_trips_payload() {
        let fx = fixture();
        let stored = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();

        let row = fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(row.activities, interval_at(9).activities);
        assert_eq!(row.screenshots, Vec::new());
    }

    #[tokio::test]
    async fn create_none_is_a_logged_no_op() {
        let fx = fixture();
        assert!(fx.intervals.create(None).await.unwrap().is_none());
        assert!(fx.intervals.backed_up_all_no_synced().await.is_empty());
    }

    #[tokio::test]
    async fn synced_flips_flag_and_is_idempotent() {
        let fx = fixture();
        let mut stored = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();

        stored.remote_id = Some("r-42".into());
        fx.intervals.synced(&mut stored).await.unwrap();

        let row = fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().unwrap();
        assert!(row.synced);
        assert_eq!(row.remote_id.as_deref(), Some("r-42"));
        assert_eq!(row.activities, interval_at(9).activities);

        // Second call rewrites the same values: remote id unchanged, payload
        // still decodes to the original content (no double encoding).
        fx.intervals.synced(&mut stored).await.unwrap();
        let row = fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(row.remote_id.as_deref(), Some("r-42"));
        assert_eq!(row.activities, interval_at(9).activities);
    }

    #[tokio::test]
    async fn backed_up_no_synced_scopes_to_offline_window() {
        let fx = fixture();
        // Before the offline window.
        fx.intervals.create(Some(interval_at(7))).await.unwrap();

        fx.offline
            .set_offline(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap());
        let inside = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();
        fx.offline
            .set_online(Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap());

        let backlog = fx.intervals.backed_up_no_synced().await;
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, inside.id);

        // The unwindowed query still sees both.
        assert_eq!(fx.intervals.backed_up_all_no_synced().await.len(), 2);
    }

    #[tokio::test]
    async fn count_falls_back_to_timer_backlog_only_at_zero() {
        let fx = fixture();
        let started_at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        fx.timers
            .save(Some(Timer::new("e1", started_at)))
            .await
            .unwrap();

        // No interval backlog: the timer backlog shows through.
        assert_eq!(fx.intervals.count_no_synced().await, 1);

        // With interval backlog the interval count wins.
        fx.intervals.create(Some(interval_at(9))).await.unwrap();
        fx.intervals.create(Some(interval_at(10))).await.unwrap();
        assert_eq!(fx.intervals.count_no_synced().await, 2);
    }

    #[tokio::test]
    async fn remove_idles_time_offline_deletes_locally_and_returns_empty() {
        let fx = fixture();
        let stored = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();
        let kept = fx.intervals.create(Some(interval_at(14))).await.unwrap().unwrap();

        fx.offline
            .set_offline(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap());

        let removed = fx
            .intervals
            .remove_idles_time(
                Some(Utc.with_ymd_and_hms(2026, 8, 1, 8, 30, 0).unwrap()),
                Some(Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap()),
            )
            .await;

        assert!(removed.is_empty());
        assert_eq!(*fx.gateway.delete_calls.lock().unwrap(), 0);
        assert!(fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().is_none());
        assert!(fx.db.find_interval_by_id(kept.id.unwrap()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_idles_time_online_returns_gateway_remote_ids() {
        let fx = fixture_with_gateway(MockGateway {
            removed: vec![
                RemovedTimeSlot { remote_id: "r-7".into() },
                RemovedTimeSlot { remote_id: "r-8".into() },
            ],
            ..MockGateway::default()
        });

        let removed = fx
            .intervals
            .remove_idles_time(
                Some(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap()),
                Some(Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap()),
            )
            .await;

        assert_eq!(removed, vec!["r-7".to_string(), "r-8".to_string()]);
        assert_eq!(*fx.gateway.delete_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_idles_time_without_range_is_a_no_op() {
        let fx = fixture();
        fx.intervals.create(Some(interval_at(9))).await.unwrap();

        let removed = fx.intervals.remove_idles_time(None, None).await;
        assert!(removed.is_empty());
        assert_eq!(*fx.gateway.delete_calls.lock().unwrap(), 0);
        assert_eq!(fx.intervals.backed_up_all_no_synced().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_without_numeric_id_issues_no_store_call() {
        let fx = fixture();
        let stored = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();

        fx.intervals.remove(None).await.unwrap();
        assert!(fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().is_some());

        fx.intervals.remove(stored.id).await.unwrap();
        assert!(fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_by_remote_id_guards_empty_input() {
        let fx = fixture();
        let mut stored = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();
        stored.remote_id = Some("r-9".into());
        fx.intervals.synced(&mut stored).await.unwrap();

        fx.intervals.remove_by_remote_id("").await.unwrap();
        assert!(fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().is_some());

        fx.intervals.remove_by_remote_id("r-9").await.unwrap();
        assert!(fx.db.find_interval_by_id(stored.id.unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_synced_skips_excluded_ids() {
        let fx = fixture();
        let mut early = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();
        early.remote_id = Some("r-1".into());
        fx.intervals.synced(&mut early).await.unwrap();

        let mut late = fx.intervals.create(Some(interval_at(11))).await.unwrap().unwrap();
        late.remote_id = Some("r-2".into());
        fx.intervals.synced(&mut late).await.unwrap();

        let last = fx.intervals.last_synced(&[]).await.unwrap();
        assert_eq!(last.id, late.id);

        let last = fx.intervals.last_synced(&[late.id.unwrap()]).await.unwrap();
        assert_eq!(last.id, early.id);
    }

    #[tokio::test]
    async fn screenshots_returns_latest_interval_payload() {
        let fx = fixture();
        fx.intervals.create(Some(interval_at(9))).await.unwrap();

        let mut with_shot = interval_at(11);
        with_shot.screenshots = vec![Screenshot {
            data: "iVBORw0KGgo=".into(),
            captured_at: Utc.with_ymd_and_hms(2026, 8, 1, 11, 5, 0).unwrap(),
        }];
        fx.intervals.create(Some(with_shot.clone())).await.unwrap();

        assert_eq!(fx.intervals.screenshots().await, with_shot.screenshots);
    }
}
