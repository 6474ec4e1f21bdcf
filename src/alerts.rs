//! Outbound notification payloads and their fire-and-forget dispatch
//!
//! The polling cycle never waits on a notifier. Each send runs as its own
//! task bounded by a timeout; the dispatcher only counts outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::Classification;
use crate::events::TemperatureUpdateEvent;
use crate::monitors::Transition;
use crate::notifier::{Notifier, NotifyError};

/// Status sent with every periodic reading.
pub const READING_STATUS: &str = "00000110";

pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Periodic reading, sent after it was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    /// Probe name, not the device slot letter.
    pub mcu_id: String,
    pub status: String,
    pub temp_value: f64,
    pub real_value: i64,
    /// `YYYYMMDD`
    pub date: String,
    /// `HH`
    pub time: String,
}

impl ReadingPayload {
    pub fn new(name: &str, value: f64, raw_value: i32, sent_at: &DateTime<FixedOffset>) -> Self {
        Self {
            mcu_id: name.to_string(),
            status: READING_STATUS.to_string(),
            temp_value: value,
            real_value: i64::from(raw_value),
            date: sent_at.format("%Y%m%d").to_string(),
            time: sent_at.format("%H").to_string(),
        }
    }
}

/// Alert or recovery, sent once per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub mcu_id: String,
    pub status: String,
    pub temp_value: f64,
    pub real_value: i64,
    /// `YYYYMMDD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
    pub message: String,
    pub alert_type: String,
    pub machine_name: String,
    pub probe_no: u8,
    pub min_temp: f64,
    pub max_temp: f64,
}

impl AlertPayload {
    pub fn from_transition(transition: &Transition, at: &DateTime<FixedOffset>) -> Self {
        let (name, min, max) = match transition {
            Transition::Alert { name, min, max, .. }
            | Transition::Recovery { name, min, max, .. } => (name.clone(), *min, *max),
        };

        let current = transition.current();
        let status = match current {
            Classification::High => "00000010",
            Classification::Low => "00000011",
            Classification::Normal => "00000001",
        };
        let value = transition.value();

        Self {
            mcu_id: name.clone(),
            status: status.to_string(),
            temp_value: value,
            real_value: (value * 100.0).trunc() as i64,
            date: at.format("%Y%m%d").to_string(),
            time: at.format("%H:%M:%S").to_string(),
            message: transition.message(),
            alert_type: current.alert_type().to_string(),
            machine_name: name,
            probe_no: transition.key().probe_no,
            min_temp: min,
            max_temp: max,
        }
    }
}

/// Dispatch counters. A dispatch counts as spawned immediately and as exactly
/// one of the other three once it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub spawned: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl DispatchStats {
    pub fn in_flight(&self) -> u64 {
        self.spawned
            .saturating_sub(self.succeeded + self.failed + self.timed_out)
    }
}

#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("enabled", &self.notifier.is_enabled())
            .field("timeout", &self.timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_enabled()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }

    #[instrument(skip_all, fields(probe = %payload.mcu_id))]
    pub fn dispatch_reading(&self, payload: ReadingPayload) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let notifier = self.notifier.clone();
        let description = format!("reading for {}", payload.mcu_id);
        Some(self.spawn(description, async move {
            notifier.send_reading(&payload).await
        }))
    }

    #[instrument(skip_all, fields(probe = %payload.machine_name, alert_type = %payload.alert_type))]
    pub fn dispatch_alert(&self, payload: AlertPayload) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let notifier = self.notifier.clone();
        let description = format!(
            "{} notification for {} probe {}",
            payload.alert_type, payload.machine_name, payload.probe_no
        );
        Some(self.spawn(description, async move {
            notifier.send_alert(&payload).await
        }))
    }

    pub fn dispatch_snapshot(
        &self,
        snapshot: Vec<TemperatureUpdateEvent>,
    ) -> Option<JoinHandle<()>> {
        if !self.is_enabled() || snapshot.is_empty() {
            return None;
        }
        let notifier = self.notifier.clone();
        let description = format!("snapshot of {} probe(s)", snapshot.len());
        Some(self.spawn(description, async move {
            notifier.publish_snapshot(&snapshot).await
        }))
    }

    fn spawn<F>(&self, description: String, send: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), NotifyError>> + Send + 'static,
    {
        let counters = self.counters.clone();
        let timeout = self.timeout;
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, send).await {
                Ok(Ok(())) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    info!("sent {description}");
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("failed to send {description}: {e}");
                }
                Err(_) => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!("{description} timed out after {}s", timeout.as_secs_f32());
                }
            }
            debug!("dispatch finished");
        })
    }
}
