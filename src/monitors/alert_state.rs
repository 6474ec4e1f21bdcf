//! Alert hysteresis
//!
//! One classification per probe, shared by both scheduler loops. A transition
//! is reported only when the classification of a probe changes; repeated
//! readings in the same band stay silent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, warn};

use super::reading::{Classification, DEFAULT_SANITY_CEILING};
use crate::{ProbeConfig, ProbeKey, SensorType};

/// Keyed alert state, owned by one scheduler and cloned into its loops.
#[derive(Debug, Clone, Default)]
pub struct AlertStateStore {
    states: Arc<Mutex<HashMap<ProbeKey, Classification>>>,
}

impl AlertStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProbeKey, Classification>> {
        // the map is always consistent between statements, so a panic while
        // holding the lock leaves nothing half-written
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &ProbeKey) -> Option<Classification> {
        self.lock().get(key).copied()
    }

    pub fn snapshot(&self) -> HashMap<ProbeKey, Classification> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record `candidate` and return the previous classification when it changed.
    fn swap(&self, key: &ProbeKey, candidate: Classification) -> Option<Classification> {
        let mut states = self.lock();
        let stored = states.entry(key.clone()).or_default();
        if *stored == candidate {
            return None;
        }
        Some(std::mem::replace(stored, candidate))
    }
}

/// A change in a probe's classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Into `High` or `Low`.
    Alert {
        key: ProbeKey,
        name: String,
        sensor_type: SensorType,
        direction: Classification,
        value: f64,
        min: f64,
        max: f64,
    },
    /// Back to `Normal`.
    Recovery {
        key: ProbeKey,
        name: String,
        sensor_type: SensorType,
        previous: Classification,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl Transition {
    pub fn key(&self) -> &ProbeKey {
        match self {
            Transition::Alert { key, .. } | Transition::Recovery { key, .. } => key,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Transition::Alert { value, .. } | Transition::Recovery { value, .. } => *value,
        }
    }

    /// Classification the probe is now in.
    pub fn current(&self) -> Classification {
        match self {
            Transition::Alert { direction, .. } => *direction,
            Transition::Recovery { .. } => Classification::Normal,
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, Transition::Alert { .. })
    }

    /// Message sent along with the alert notification.
    pub fn message(&self) -> String {
        match self {
            Transition::Alert {
                key,
                name,
                sensor_type,
                direction,
                value,
                min,
                max,
            } => {
                let unit = sensor_type.unit();
                let level = match direction {
                    Classification::Low => "too low",
                    _ => "too high",
                };
                let range = format!("{min:.2}-{max:.2}{unit}");
                format!(
                    "{} {level} (current: {value:.2}{unit}, range: {range}) {name}({})",
                    sensor_type.label(),
                    key.probe_no
                )
            }
            Transition::Recovery {
                sensor_type, value, ..
            } => format!(
                "{} back to normal range (current: {value:.2}{})",
                sensor_type.label(),
                sensor_type.unit()
            ),
        }
    }
}

/// Evaluates calibrated values against the stored state of their probe.
#[derive(Debug, Clone)]
pub struct AlertStateTracker {
    store: AlertStateStore,
    sanity_ceiling: f64,
}

impl AlertStateTracker {
    pub fn new(store: AlertStateStore) -> Self {
        Self::with_sanity_ceiling(store, DEFAULT_SANITY_CEILING)
    }

    pub fn with_sanity_ceiling(store: AlertStateStore, sanity_ceiling: f64) -> Self {
        Self {
            store,
            sanity_ceiling,
        }
    }

    pub fn store(&self) -> &AlertStateStore {
        &self.store
    }

    /// Classify `value` for the probe described by `config` and report the
    /// transition, if any.
    ///
    /// Values above the sanity ceiling are discarded without touching state.
    #[instrument(skip_all, fields(probe = %config.key()))]
    pub fn evaluate(&self, config: &ProbeConfig, value: f64) -> Option<Transition> {
        if value > self.sanity_ceiling {
            warn!(
                "{} probe {}: {value:.2} above sanity ceiling, not evaluated",
                config.name, config.probe_no
            );
            return None;
        }

        let key = config.key();
        let (min, max) = (config.min(), config.max());
        let candidate = Classification::classify(value, min, max);

        let previous = self.store.swap(&key, candidate)?;
        debug!("{key}: {previous:?} -> {candidate:?}");

        let unit = config.sensor_type.unit();
        let transition = if candidate.is_alert() {
            warn!(
                "ALERT: {} probe {} - {} {value:.2}{unit} is {} (min: {min:.2}, max: {max:.2})",
                config.name,
                config.probe_no,
                config.sensor_type.label(),
                candidate.alert_type().to_uppercase(),
            );
            Transition::Alert {
                key,
                name: config.name.clone(),
                sensor_type: config.sensor_type,
                direction: candidate,
                value,
                min,
                max,
            }
        } else {
            info!(
                "NORMAL: {} probe {} - {value:.2}{unit} returned to normal range",
                config.name, config.probe_no
            );
            Transition::Recovery {
                key,
                name: config.name.clone(),
                sensor_type: config.sensor_type,
                previous,
                value,
                min,
                max,
            }
        };

        Some(transition)
    }
}
