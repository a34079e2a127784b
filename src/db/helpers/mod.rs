use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

/// Serialize an activities/screenshots payload to the JSON text stored in its
/// column. The stored form is always a JSON document, never a quoted string,
/// so re-encoding an already persisted record is idempotent.
pub fn encode_payload<T: Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to serialize {field}"))
}

/// Decode a payload column back into its domain form. Rows written by older
/// agents may carry one extra JSON-string layer; unwrap it once and retry.
pub fn decode_payload<T: DeserializeOwned>(raw: &str, field: &str) -> Result<T> {
    match serde_json::from_str::<T>(raw) {
        Ok(value) => Ok(value),
        Err(outer) => {
            let inner: String = serde_json::from_str(raw)
                .map_err(|_| anyhow!("failed to parse {field}: {outer}"))?;
            serde_json::from_str(&inner).with_context(|| format!("failed to parse {field}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Activity;

    #[test]
    fn payload_round_trip_preserves_content() {
        let activities = vec![Activity {
            title: "IDE".into(),
            duration_secs: 540,
            app: Some("code".into()),
        }];

        let encoded = encode_payload(&activities, "activities").unwrap();
        let decoded: Vec<Activity> = decode_payload(&encoded, "activities").unwrap();
        assert_eq!(decoded, activities);
    }

    #[test]
    fn decode_unwraps_one_legacy_string_layer() {
        let activities = vec![Activity {
            title: "Terminal".into(),
            duration_secs: 60,
            app: None,
        }];

        let once = serde_json::to_string(&activities).unwrap();
        let twice = serde_json::to_string(&once).unwrap();

        let decoded: Vec<Activity> = decode_payload(&twice, "activities").unwrap();
        assert_eq!(decoded, activities);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result: Result<Vec<Activity>> = decode_payload("not json", "activities");
        assert!(result.is_err());
    }
}
