use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{decode_payload, encode_payload, parse_datetime, to_u64},
    models::{Activity, Interval, Screenshot},
};

const INTERVAL_COLUMNS: &str = "id, remote_id, employee_id, timer_id, started_at, stopped_at, activities, screenshots, synced";

fn row_to_interval(row: &Row) -> Result<Interval> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: String = row.get("stopped_at")?;
    let activities_json: String = row.get("activities")?;
    let screenshots_json: String = row.get("screenshots")?;

    let activities: Vec<Activity> = decode_payload(&activities_json, "activities")?;
    let screenshots: Vec<Screenshot> = decode_payload(&screenshots_json, "screenshots")?;

    Ok(Interval {
        id: row.get("id")?,
        remote_id: row.get("remote_id")?,
        employee_id: row.get("employee_id")?,
        timer_id: row.get("timer_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_datetime(&stopped_at, "stopped_at")?,
        activities,
        screenshots,
        synced: row.get("synced")?,
    })
}

impl Database {
    /// Upsert. The payload columns always hold JSON text serialized from the
    /// domain vectors. Returns the local id.
    pub async fn save_interval(&self, interval: &Interval) -> Result<i64> {
        let record = interval.clone();
        self.execute(move |conn| {
            let activities = encode_payload(&record.activities, "activities")?;
            let screenshots = encode_payload(&record.screenshots, "screenshots")?;

            match record.id {
                Some(id) => {
                    conn.execute(
                        "INSERT INTO intervals (id, remote_id, employee_id, timer_id, started_at, stopped_at, activities, screenshots, synced)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(id) DO UPDATE SET
                             remote_id = excluded.remote_id,
                             employee_id = excluded.employee_id,
                             timer_id = excluded.timer_id,
                             started_at = excluded.started_at,
                             stopped_at = excluded.stopped_at,
                             activities = excluded.activities,
                             screenshots = excluded.screenshots,
                             synced = excluded.synced",
                        params![
                            id,
                            record.remote_id,
                            record.employee_id,
                            record.timer_id,
                            record.started_at.to_rfc3339(),
                            record.stopped_at.to_rfc3339(),
                            activities,
                            screenshots,
                            record.synced,
                        ],
                    )?;
                    Ok(id)
                }
                None => {
                    conn.execute(
                        "INSERT INTO intervals (remote_id, employee_id, timer_id, started_at, stopped_at, activities, screenshots, synced)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            record.remote_id,
                            record.employee_id,
                            record.timer_id,
                            record.started_at.to_rfc3339(),
                            record.stopped_at.to_rfc3339(),
                            activities,
                            screenshots,
                            record.synced,
                        ],
                    )?;
                    Ok(conn.last_insert_rowid())
                }
            }
        })
        .await
    }

    pub async fn update_interval(&self, id: i64, interval: &Interval) -> Result<()> {
        let record = interval.clone();
        self.execute(move |conn| {
            let activities = encode_payload(&record.activities, "activities")?;
            let screenshots = encode_payload(&record.screenshots, "screenshots")?;

            conn.execute(
                "UPDATE intervals
                 SET remote_id = ?1,
                     timer_id = ?2,
                     started_at = ?3,
                     stopped_at = ?4,
                     activities = ?5,
                     screenshots = ?6,
                     synced = ?7
                 WHERE id = ?8",
                params![
                    record.remote_id,
                    record.timer_id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.to_rfc3339(),
                    activities,
                    screenshots,
                    record.synced,
                    id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_interval(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM intervals WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn delete_interval_by_remote_id(&self, remote_id: &str) -> Result<()> {
        let remote_id = remote_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM intervals WHERE remote_id = ?1",
                params![remote_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn find_interval_by_id(&self, id: i64) -> Result<Option<Interval>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_interval(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn find_intervals_synced(
        &self,
        synced: bool,
        employee_id: &str,
    ) -> Result<Vec<Interval>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals
                 WHERE employee_id = ?1 AND synced = ?2
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query(params![employee_id, synced])?;
            let mut intervals = Vec::new();
            while let Some(row) = rows.next()? {
                intervals.push(row_to_interval(row)?);
            }
            Ok(intervals)
        })
        .await
    }

    /// Unsynced intervals scoped to an offline window. An open bound leaves
    /// that side of the window unconstrained. Oldest first.
    pub async fn backed_up_no_synced(
        &self,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
        employee_id: &str,
    ) -> Result<Vec<Interval>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals
                 WHERE employee_id = ?1
                   AND synced = 0
                   AND (?2 IS NULL OR started_at >= ?2)
                   AND (?3 IS NULL OR started_at <= ?3)
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query(params![
                employee_id,
                window_start.map(|dt| dt.to_rfc3339()),
                window_end.map(|dt| dt.to_rfc3339()),
            ])?;
            let mut intervals = Vec::new();
            while let Some(row) = rows.next()? {
                intervals.push(row_to_interval(row)?);
            }
            Ok(intervals)
        })
        .await
    }

    pub async fn backed_up_all_no_synced(&self, employee_id: &str) -> Result<Vec<Interval>> {
        self.find_intervals_synced(false, employee_id).await
    }

    /// Most recent synced interval, skipping the given local ids. Used so the
    /// sync pass never re-offers a record it is currently retrying.
    pub async fn last_synced_interval(
        &self,
        employee_id: &str,
        exclude_ids: &[i64],
    ) -> Result<Option<Interval>> {
        let employee_id = employee_id.to_string();
        // Numeric ids are inlined; no user-controlled text reaches the SQL.
        let exclusion = if exclude_ids.is_empty() {
            String::new()
        } else {
            let ids = exclude_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!("AND id NOT IN ({ids})")
        };

        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals
                 WHERE employee_id = ?1 AND synced = 1 {exclusion}
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![employee_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_interval(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Deletes local rows falling inside the idle window. Local half of the
    /// idle-time reconciliation; the remote half goes through the gateway.
    pub async fn delete_locally_idles_time(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        employee_id: &str,
    ) -> Result<()> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM intervals
                 WHERE employee_id = ?1
                   AND started_at >= ?2
                   AND stopped_at <= ?3",
                params![
                    employee_id,
                    started_at.to_rfc3339(),
                    stopped_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Screenshot payload of the most recent interval for the employee.
    pub async fn latest_screenshots(&self, employee_id: &str) -> Result<Vec<Screenshot>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT screenshots FROM intervals
                 WHERE employee_id = ?1
                 ORDER BY started_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query(params![employee_id])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row.get(0)?;
                    decode_payload(&raw, "screenshots")
                }
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    pub async fn count_intervals(&self, synced: bool, employee_id: &str) -> Result<u64> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) AS total FROM intervals WHERE employee_id = ?1 AND synced = ?2",
                params![employee_id, synced],
                |row| row.get("total"),
            )?;
            to_u64(total, "total")
        })
        .await
    }
}
