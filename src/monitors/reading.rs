use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::ProbeConfig;
use crate::protocol::RawReading;
use crate::util::round_2;

/// Calibrated values above this are treated as a broken sensor.
pub const DEFAULT_SANITY_CEILING: f64 = 80.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[default]
    #[serde(rename = "N")]
    Normal,
    #[serde(rename = "H")]
    High,
    #[serde(rename = "L")]
    Low,
}

impl Classification {
    /// Classify against an inclusive `[min, max]` range.
    pub fn classify(value: f64, min: f64, max: f64) -> Classification {
        if value < min {
            Classification::Low
        } else if value > max {
            Classification::High
        } else {
            Classification::Normal
        }
    }

    /// Single-letter status stored with readings and streamed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Classification::Normal => "N",
            Classification::High => "H",
            Classification::Low => "L",
        }
    }

    pub fn alert_type(&self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::High => "high",
            Classification::Low => "low",
        }
    }

    pub fn is_alert(&self) -> bool {
        !matches!(self, Classification::Normal)
    }
}

/// What became of one decoded reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessOutcome {
    Accepted {
        value: f64,
        classification: Classification,
    },
    /// Raw sentinel from a disconnected sensor.
    SensorFault,
    /// Calibrated value above the sanity ceiling.
    SanityExceeded(f64),
}

impl ProcessOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            ProcessOutcome::Accepted { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// Applies calibration, rounding, the sanity ceiling and threshold
/// classification to decoded readings.
#[derive(Debug, Clone, Copy)]
pub struct ReadingProcessor {
    sanity_ceiling: f64,
}

impl Default for ReadingProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_SANITY_CEILING)
    }
}

impl ReadingProcessor {
    pub fn new(sanity_ceiling: f64) -> Self {
        Self { sanity_ceiling }
    }

    pub fn sanity_ceiling(&self) -> f64 {
        self.sanity_ceiling
    }

    pub fn calibrate(&self, config: &ProbeConfig, temperature: f64) -> f64 {
        round_2(temperature + config.offset())
    }

    pub fn process(&self, config: &ProbeConfig, raw: &RawReading) -> ProcessOutcome {
        if raw.is_sensor_fault() {
            debug!(
                "{}: skipping broken sensor data (raw 0x{:04X})",
                config.for_probe(raw.probe_no).key(),
                raw.raw_value as u16
            );
            return ProcessOutcome::SensorFault;
        }

        let value = self.calibrate(config, raw.temperature);
        if value > self.sanity_ceiling {
            debug!(
                "{} probe {}: {value:.2}{} exceeds sanity ceiling {:.0}",
                config.name,
                raw.probe_no,
                config.sensor_type.unit(),
                self.sanity_ceiling
            );
            return ProcessOutcome::SanityExceeded(value);
        }

        let classification = Classification::classify(value, config.min(), config.max());
        trace!(
            "{} probe {}: {value:.2} (min: {}, max: {}) -> {classification:?}",
            config.name,
            raw.probe_no,
            config.min(),
            config.max()
        );

        ProcessOutcome::Accepted {
            value,
            classification,
        }
    }
}
