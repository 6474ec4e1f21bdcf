pub mod actors;
pub mod alerts;
pub mod config;
pub mod events;
pub mod monitors;
pub mod notifier;
pub mod probe;
pub mod protocol;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub use monitors::reading::Classification;

/// Identity of one logical probe channel: `(ip, probe_no)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeKey {
    pub ip: String,
    pub probe_no: u8,
}

impl ProbeKey {
    pub fn new(ip: impl Into<String>, probe_no: u8) -> Self {
        Self {
            ip: ip.into(),
            probe_no,
        }
    }
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.probe_no)
    }
}

/// A TCP target; several probes may share one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeEndpoint {
    pub ip: String,
    pub port: u16,
}

impl ProbeEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for ProbeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    #[default]
    #[serde(alias = "t")]
    Temperature,
    #[serde(alias = "h")]
    Humidity,
    #[serde(alias = "p")]
    Power,
}

impl SensorType {
    /// Single-letter code used by the storage schema.
    pub fn code(&self) -> &'static str {
        match self {
            SensorType::Temperature => "t",
            SensorType::Humidity => "h",
            SensorType::Power => "p",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "h" => SensorType::Humidity,
            "p" => SensorType::Power,
            _ => SensorType::Temperature,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorType::Temperature => "Temperature",
            SensorType::Humidity => "Humidity",
            SensorType::Power => "Power",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Humidity => "%",
            SensorType::Power => "W",
        }
    }
}

const DEFAULT_MIN_THRESHOLD: f64 = 0.0;
const DEFAULT_MAX_THRESHOLD: f64 = 100.0;

fn default_probe_no() -> u8 {
    1
}

/// Per-probe configuration, keyed by `(ip, probe_no)`.
///
/// Thresholds and offset are optional in storage; the accessors apply the
/// defaults (min 0, max 100, offset 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub ip: String,
    #[serde(default = "default_probe_no")]
    pub probe_no: u8,
    pub name: String,
    #[serde(default)]
    pub sensor_type: SensorType,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub calibration_offset: Option<f64>,
}

impl ProbeConfig {
    pub fn key(&self) -> ProbeKey {
        ProbeKey::new(self.ip.clone(), self.probe_no)
    }

    pub fn min(&self) -> f64 {
        self.min_threshold.unwrap_or(DEFAULT_MIN_THRESHOLD)
    }

    pub fn max(&self) -> f64 {
        self.max_threshold.unwrap_or(DEFAULT_MAX_THRESHOLD)
    }

    pub fn offset(&self) -> f64 {
        self.calibration_offset.unwrap_or_default()
    }

    /// Same configuration re-addressed to another probe slot of the endpoint.
    ///
    /// Used when a device reports a probe number nobody configured.
    pub fn for_probe(&self, probe_no: u8) -> Self {
        Self {
            probe_no,
            ..self.clone()
        }
    }
}

/// A calibrated, classified reading. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub key: ProbeKey,
    pub name: String,
    pub mcu_id: String,
    pub raw_value: i32,
    pub value: f64,
    pub classification: Classification,
    /// Start of the poll cycle that produced the reading.
    pub sent_at: DateTime<FixedOffset>,
    /// Ingestion time; part of the storage key.
    pub recorded_at: DateTime<FixedOffset>,
}
