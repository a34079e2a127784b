use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{Interval, Timer};

/// A record the remote service reports as deleted by an idle-time sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemovedTimeSlot {
    pub remote_id: String,
}

/// A remote time log overlapping a queried range. Consumed for conflict
/// detection; the shape is defined by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTimeLog {
    pub remote_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Backend surface consumed for reconciliation. Upload calls return the
/// identifier the remote service assigned to the record.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn upload_interval(&self, interval: &Interval) -> Result<String>;

    async fn upload_timer(&self, timer: &Timer) -> Result<String>;

    /// Deletes the idle range remotely and returns the deleted records.
    async fn delete_idles_time(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        employee_id: &str,
    ) -> Result<Vec<RemovedTimeSlot>>;

    async fn conflicts(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        employee_id: &str,
    ) -> Result<Vec<RemoteTimeLog>>;

    /// Connectivity probe used by the offline-mode monitor.
    async fn ping(&self) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeLogPayload<'a> {
    /// Client-generated correlation id so a retried upload stays traceable.
    client_id: Uuid,
    employee_id: &'a str,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
    /// Whether the session boundaries were recorded while offline, so the
    /// backend can treat the reported times as client-side truth.
    #[serde(skip_serializing_if = "Option::is_none")]
    is_started_offline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_stopped_offline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activities: Option<&'a [crate::db::models::Activity]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshots: Option<&'a [crate::db::models::Screenshot]>,
}

#[derive(Deserialize)]
struct CreatedTimeLog {
    id: String,
}

/// REST implementation of the gateway contract.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn post_time_log(&self, payload: &TimeLogPayload<'_>) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, "/time-log")
            .json(payload)
            .send()
            .await
            .context("time-log upload request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "time-log upload rejected with status {}",
                response.status()
            ));
        }

        let created: CreatedTimeLog = response
            .json()
            .await
            .context("failed to decode time-log upload response")?;
        Ok(created.id)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn upload_interval(&self, interval: &Interval) -> Result<String> {
        let payload = TimeLogPayload {
            client_id: Uuid::new_v4(),
            employee_id: &interval.employee_id,
            started_at: interval.started_at,
            stopped_at: Some(interval.stopped_at),
            is_started_offline: None,
            is_stopped_offline: None,
            activities: Some(&interval.activities),
            screenshots: Some(&interval.screenshots),
        };
        self.post_time_log(&payload).await
    }

    async fn upload_timer(&self, timer: &Timer) -> Result<String> {
        let payload = TimeLogPayload {
            client_id: Uuid::new_v4(),
            employee_id: &timer.employee_id,
            started_at: timer.started_at,
            stopped_at: timer.stopped_at,
            is_started_offline: Some(timer.is_started_offline),
            is_stopped_offline: Some(timer.is_stopped_offline),
            activities: None,
            screenshots: None,
        };
        self.post_time_log(&payload).await
    }

    async fn delete_idles_time(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        employee_id: &str,
    ) -> Result<Vec<RemovedTimeSlot>> {
        let response = self
            .request(reqwest::Method::DELETE, "/time-log/idle")
            .query(&[
                ("start", started_at.to_rfc3339()),
                ("end", stopped_at.to_rfc3339()),
                ("employeeId", employee_id.to_string()),
            ])
            .send()
            .await
            .context("idle-time delete request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "idle-time delete rejected with status {}",
                response.status()
            ));
        }

        response
            .json()
            .await
            .context("failed to decode idle-time delete response")
    }

    async fn conflicts(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        employee_id: &str,
    ) -> Result<Vec<RemoteTimeLog>> {
        let response = self
            .request(reqwest::Method::GET, "/time-log/conflict")
            .query(&[
                ("start", started_at.to_rfc3339()),
                ("end", stopped_at.to_rfc3339()),
                ("employeeId", employee_id.to_string()),
            ])
            .send()
            .await
            .context("conflict query request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "conflict query rejected with status {}",
                response.status()
            ));
        }

        response
            .json()
            .await
            .context("failed to decode conflict query response")
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "/health")
            .send()
            .await
            .context("health probe failed")?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("health probe returned {}", response.status()))
        }
    }
}
