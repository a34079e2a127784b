use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, to_u64},
    models::Timer,
};

const TIMER_COLUMNS: &str = "id, remote_id, employee_id, started_at, stopped_at, synced, is_started_offline, is_stopped_offline";

fn row_to_timer(row: &Row) -> Result<Timer> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;

    Ok(Timer {
        id: row.get("id")?,
        remote_id: row.get("remote_id")?,
        employee_id: row.get("employee_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        synced: row.get("synced")?,
        is_started_offline: row.get("is_started_offline")?,
        is_stopped_offline: row.get("is_stopped_offline")?,
    })
}

impl Database {
    /// Upsert. Inserts when the record carries no local id, otherwise
    /// replaces the stored row. Returns the local id.
    pub async fn save_timer(&self, timer: &Timer) -> Result<i64> {
        let record = timer.clone();
        self.execute(move |conn| {
            match record.id {
                Some(id) => {
                    conn.execute(
                        "INSERT INTO timers (id, remote_id, employee_id, started_at, stopped_at, synced, is_started_offline, is_stopped_offline)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                         ON CONFLICT(id) DO UPDATE SET
                             remote_id = excluded.remote_id,
                             employee_id = excluded.employee_id,
                             started_at = excluded.started_at,
                             stopped_at = excluded.stopped_at,
                             synced = excluded.synced,
                             is_started_offline = excluded.is_started_offline,
                             is_stopped_offline = excluded.is_stopped_offline",
                        params![
                            id,
                            record.remote_id,
                            record.employee_id,
                            record.started_at.to_rfc3339(),
                            record.stopped_at.map(|dt| dt.to_rfc3339()),
                            record.synced,
                            record.is_started_offline,
                            record.is_stopped_offline,
                        ],
                    )?;
                    Ok(id)
                }
                None => {
                    conn.execute(
                        "INSERT INTO timers (remote_id, employee_id, started_at, stopped_at, synced, is_started_offline, is_stopped_offline)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            record.remote_id,
                            record.employee_id,
                            record.started_at.to_rfc3339(),
                            record.stopped_at.map(|dt| dt.to_rfc3339()),
                            record.synced,
                            record.is_started_offline,
                            record.is_stopped_offline,
                        ],
                    )?;
                    Ok(conn.last_insert_rowid())
                }
            }
        })
        .await
    }

    pub async fn update_timer(&self, id: i64, timer: &Timer) -> Result<()> {
        let record = timer.clone();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE timers
                 SET remote_id = ?1,
                     started_at = ?2,
                     stopped_at = ?3,
                     synced = ?4,
                     is_started_offline = ?5,
                     is_stopped_offline = ?6
                 WHERE id = ?7",
                params![
                    record.remote_id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.map(|dt| dt.to_rfc3339()),
                    record.synced,
                    record.is_started_offline,
                    record.is_stopped_offline,
                    id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_timer(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM timers WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn find_timer_by_id(&self, id: i64) -> Result<Option<Timer>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_timer(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn find_last_timer(&self, employee_id: &str) -> Result<Option<Timer>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![employee_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_timer(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Most recent timer that owns capture data, i.e. has at least one
    /// interval attached.
    pub async fn find_last_capture_timer(&self, employee_id: &str) -> Result<Option<Timer>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1
                   AND id IN (SELECT timer_id FROM intervals WHERE timer_id IS NOT NULL)
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![employee_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_timer(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn find_running_timer(&self, employee_id: &str) -> Result<Option<Timer>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND stopped_at IS NULL
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![employee_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_timer(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn find_all_timers(&self, employee_id: &str) -> Result<Vec<Timer>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query(params![employee_id])?;
            let mut timers = Vec::new();
            while let Some(row) = rows.next()? {
                timers.push(row_to_timer(row)?);
            }
            Ok(timers)
        })
        .await
    }

    pub async fn find_timers_synced(
        &self,
        synced: bool,
        employee_id: &str,
    ) -> Result<Vec<Timer>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND synced = ?2
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query(params![employee_id, synced])?;
            let mut timers = Vec::new();
            while let Some(row) = rows.next()? {
                timers.push(row_to_timer(row)?);
            }
            Ok(timers)
        })
        .await
    }

    /// Timers whose stop was recorded while the agent was offline.
    pub async fn find_interrupted_timers(&self, employee_id: &str) -> Result<Vec<Timer>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND is_stopped_offline = 1
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query(params![employee_id])?;
            let mut timers = Vec::new();
            while let Some(row) = rows.next()? {
                timers.push(row_to_timer(row)?);
            }
            Ok(timers)
        })
        .await
    }

    /// Single-row aggregate matching the `count(synced, employee)` contract.
    pub async fn count_timers(&self, synced: bool, employee_id: &str) -> Result<u64> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) AS total FROM timers WHERE employee_id = ?1 AND synced = ?2",
                params![employee_id, synced],
                |row| row.get("total"),
            )?;
            to_u64(total, "total")
        })
        .await
    }
}
