use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{EngineEvent, EventBus};
use crate::gateway::RemoteGateway;
use crate::offline::OfflineReader;
use crate::services::{IntervalService, TimerService};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

const PASS_INTERVAL_SECS: u64 = 60;

/// Periodic sync pass. Retry has no per-call backoff: a failed pass simply
/// leaves the backlog in place and the next scheduled pass re-offers it.
pub struct SyncWorker {
    timers: TimerService,
    intervals: IntervalService,
    gateway: Arc<dyn RemoteGateway>,
    offline: OfflineReader,
    events: EventBus,
    pass_interval: Duration,
}

impl SyncWorker {
    pub fn new(
        timers: TimerService,
        intervals: IntervalService,
        gateway: Arc<dyn RemoteGateway>,
        offline: OfflineReader,
        events: EventBus,
    ) -> Self {
        Self {
            timers,
            intervals,
            gateway,
            offline,
            events,
            pass_interval: Duration::from_secs(PASS_INTERVAL_SECS),
        }
    }

    pub fn with_pass_interval(mut self, interval: Duration) -> Self {
        self.pass_interval = interval;
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.pass_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.offline.enabled() {
                        continue;
                    }
                    if let Err(err) = self.run_pass().await {
                        log_error!("sync pass aborted: {err:#}");
                    }
                }
                _ = cancel.cancelled() => {
                    log_info!("sync worker shutting down");
                    break;
                }
            }
        }
    }

    /// Drains the backlog oldest first: timers, then intervals. Each
    /// successful upload is marked synced immediately so a failure mid-batch
    /// leaves only genuinely pending records behind. The first upload failure
    /// ends the pass; older records are never skipped past newer ones.
    pub async fn run_pass(&self) -> Result<()> {
        for mut timer in self.timers.find_to_synced().await {
            let Some(timer_id) = timer.id else {
                continue;
            };
            match self.gateway.upload_timer(&timer).await {
                Ok(remote_id) => {
                    timer.remote_id = Some(remote_id.clone());
                    timer.synced = true;
                    self.timers
                        .update(&timer)
                        .await
                        .context("failed to persist synced timer")?;
                    self.events.emit(EngineEvent::TimerSynced {
                        timer_id,
                        remote_id,
                    });
                }
                Err(err) => {
                    log_info!("timer {timer_id} upload failed, retrying next pass: {err:#}");
                    self.finish_pass().await;
                    return Ok(());
                }
            }
        }

        for mut interval in self.intervals.backed_up_all_no_synced().await {
            let Some(interval_id) = interval.id else {
                continue;
            };
            match self.gateway.upload_interval(&interval).await {
                Ok(remote_id) => {
                    interval.remote_id = Some(remote_id.clone());
                    self.intervals
                        .synced(&mut interval)
                        .await
                        .context("failed to persist synced interval")?;
                    self.events.emit(EngineEvent::IntervalSynced {
                        interval_id,
                        remote_id,
                    });
                }
                Err(err) => {
                    log_info!(
                        "interval {interval_id} upload failed, retrying next pass: {err:#}"
                    );
                    break;
                }
            }
        }

        self.finish_pass().await;
        Ok(())
    }

    async fn finish_pass(&self) {
        let pending = self.intervals.count_no_synced().await;
        self.events.emit(EngineEvent::SyncProgress { pending });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticUserContext, UserContext};
    use crate::db::models::{Activity, Interval, Timer};
    use crate::db::Database;
    use crate::gateway::{RemoteTimeLog, RemovedTimeSlot};
    use crate::offline::OfflineHandle;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Gateway that accepts the first `accept` uploads and fails the rest.
    struct FlakyGateway {
        accept: Mutex<u32>,
        uploads: Mutex<Vec<String>>,
        next_id: Mutex<u32>,
    }

    impl FlakyGateway {
        fn accepting(accept: u32) -> Self {
            Self {
                accept: Mutex::new(accept),
                uploads: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }
        }

        fn admit(&self, label: String) -> anyhow::Result<String> {
            let mut accept = self.accept.lock().unwrap();
            if *accept == 0 {
                return Err(anyhow!("gateway unavailable"));
            }
            *accept -= 1;
            self.uploads.lock().unwrap().push(label);
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            Ok(format!("r-{}", *next))
        }
    }

    #[async_trait]
    impl RemoteGateway for FlakyGateway {
        async fn upload_interval(&self, interval: &Interval) -> anyhow::Result<String> {
            self.admit(format!("interval-{}", interval.id.unwrap_or_default()))
        }

        async fn upload_timer(&self, timer: &Timer) -> anyhow::Result<String> {
            self.admit(format!("timer-{}", timer.id.unwrap_or_default()))
        }

        async fn delete_idles_time(
            &self,
            _started_at: DateTime<Utc>,
            _stopped_at: DateTime<Utc>,
            _employee_id: &str,
        ) -> anyhow::Result<Vec<RemovedTimeSlot>> {
            Ok(Vec::new())
        }

        async fn conflicts(
            &self,
            _started_at: DateTime<Utc>,
            _stopped_at: DateTime<Utc>,
            _employee_id: &str,
        ) -> anyhow::Result<Vec<RemoteTimeLog>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        timers: TimerService,
        intervals: IntervalService,
        gateway: Arc<FlakyGateway>,
        events: EventBus,
        worker: SyncWorker,
        _dir: TempDir,
    }

    fn fixture(accept: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("tracksync.sqlite3")).unwrap();
        let user: Arc<dyn UserContext> = Arc::new(StaticUserContext::new("e1"));
        let offline = OfflineHandle::new();
        let gateway = Arc::new(FlakyGateway::accepting(accept));
        let events = EventBus::default();
        let timers = TimerService::new(db.clone(), user.clone(), offline.reader());
        let intervals = IntervalService::new(
            db,
            user,
            offline.reader(),
            gateway.clone(),
            timers.clone(),
        );
        let worker = SyncWorker::new(
            timers.clone(),
            intervals.clone(),
            gateway.clone(),
            offline.reader(),
            events.clone(),
        );
        Fixture {
            timers,
            intervals,
            gateway,
            events,
            worker,
            _dir: dir,
        }
    }

    fn interval_at(hour: u32) -> Interval {
        let started_at = Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0).unwrap();
        let mut interval =
            Interval::new("e1", started_at, started_at + ChronoDuration::minutes(10));
        interval.activities = vec![Activity {
            title: "IDE".into(),
            duration_secs: 600,
            app: None,
        }];
        interval
    }

    #[tokio::test]
    async fn pass_drains_backlog_oldest_first_and_marks_synced() {
        let fx = fixture(u32::MAX);
        let mut events = fx.events.subscribe();

        let a = fx.intervals.create(Some(interval_at(11))).await.unwrap().unwrap();
        let b = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();

        fx.worker.run_pass().await.unwrap();

        // Oldest (b, 09:00) went first even though it was created second.
        let uploads = fx.gateway.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![
                format!("interval-{}", b.id.unwrap()),
                format!("interval-{}", a.id.unwrap()),
            ]
        );

        assert!(fx.intervals.backed_up_all_no_synced().await.is_empty());
        assert_eq!(fx.intervals.count_no_synced().await, 0);

        match events.recv().await.unwrap() {
            EngineEvent::IntervalSynced { interval_id, .. } => {
                assert_eq!(interval_id, b.id.unwrap())
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_upload_leaves_backlog_for_next_pass() {
        let fx = fixture(1);

        fx.intervals.create(Some(interval_at(9))).await.unwrap();
        fx.intervals.create(Some(interval_at(10))).await.unwrap();

        fx.worker.run_pass().await.unwrap();

        // One made it through before the gateway went dark; the other stays.
        let backlog = fx.intervals.backed_up_all_no_synced().await;
        assert_eq!(backlog.len(), 1);
        assert_eq!(
            backlog[0].started_at,
            Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap()
        );

        // Next pass picks the survivor up; nothing is skipped permanently.
        *fx.gateway.accept.lock().unwrap() = u32::MAX;
        fx.worker.run_pass().await.unwrap();
        assert!(fx.intervals.backed_up_all_no_synced().await.is_empty());
    }

    #[tokio::test]
    async fn timers_sync_before_intervals() {
        let fx = fixture(u32::MAX);

        let started_at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        let mut timer = Timer::new("e1", started_at);
        timer.stopped_at = Some(started_at + ChronoDuration::hours(1));
        let timer = fx.timers.save(Some(timer)).await.unwrap().unwrap();
        let interval = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();

        fx.worker.run_pass().await.unwrap();

        let uploads = fx.gateway.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![
                format!("timer-{}", timer.id.unwrap()),
                format!("interval-{}", interval.id.unwrap()),
            ]
        );

        assert_eq!(fx.timers.count_no_synced().await, 0);
        let stored = fx.timers.find_by_id(&timer).await.unwrap();
        assert!(stored.synced);
        assert!(stored.remote_id.is_some());
    }

    #[tokio::test]
    async fn each_record_uploads_exactly_once_across_passes() {
        let fx = fixture(u32::MAX);
        let interval = fx.intervals.create(Some(interval_at(9))).await.unwrap().unwrap();

        fx.worker.run_pass().await.unwrap();
        fx.worker.run_pass().await.unwrap();

        let uploads = fx.gateway.uploads.lock().unwrap().clone();
        assert_eq!(uploads, vec![format!("interval-{}", interval.id.unwrap())]);
    }
}
