//! Persisted records and their column encodings
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision and the
//! local offset, so two rows written within the same microsecond collide on
//! the primary key.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::monitors::Transition;
use crate::{Classification, ProbeKey, SensorType};

/// An out-of-range event, written when a probe moves into `High` or `Low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub key: ProbeKey,
    pub name: String,
    pub sensor_type: SensorType,
    pub direction: Classification,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub occurred_at: DateTime<FixedOffset>,
}

impl AlertRecord {
    /// Build a record for an alert transition. Recoveries are not recorded.
    pub fn from_transition(
        transition: &Transition,
        occurred_at: DateTime<FixedOffset>,
    ) -> Option<Self> {
        match transition {
            Transition::Alert {
                key,
                name,
                sensor_type,
                direction,
                value,
                min,
                max,
            } => Some(Self {
                key: key.clone(),
                name: name.clone(),
                sensor_type: *sensor_type,
                direction: *direction,
                value: *value,
                min: *min,
                max: *max,
                occurred_at,
            }),
            Transition::Recovery { .. } => None,
        }
    }
}

pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn parse_timestamp(value: &str) -> StorageResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {value:?}: {e}")))
}

pub fn parse_classification(code: &str) -> StorageResult<Classification> {
    match code {
        "N" => Ok(Classification::Normal),
        "H" => Ok(Classification::High),
        "L" => Ok(Classification::Low),
        other => Err(StorageError::Corrupt(format!(
            "unknown classification {other:?}"
        ))),
    }
}
