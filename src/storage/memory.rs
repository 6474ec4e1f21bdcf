//! In-memory repository (no persistence)
//!
//! Used when no database is configured and throughout the tests. Keys behave
//! like the SQLite schema: a second reading for the same probe at the same
//! instant is a duplicate.
//!
//! Only the most recent readings and alert records of each probe are kept,
//! see [`DEFAULT_RETENTION`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{HealthStatus, Repository};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRecord, format_timestamp};
use crate::{ProbeConfig, ProbeKey, Reading};

/// Readings (and alert records) retained per probe.
pub const DEFAULT_RETENTION: usize = 1024;

/// Bounded per-probe history with an index of the instants it holds.
#[derive(Debug)]
struct History<T> {
    entries: VecDeque<(DateTime<FixedOffset>, T)>,
    instants: HashSet<DateTime<FixedOffset>>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            instants: HashSet::new(),
        }
    }
}

impl<T: Clone> History<T> {
    fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        self.instants.contains(at)
    }

    /// Append an entry, evicting the oldest ones beyond `retention`.
    fn push(&mut self, at: DateTime<FixedOffset>, entry: T, retention: usize) -> usize {
        self.instants.insert(at);
        self.entries.push_back((at, entry));

        let mut evicted = 0;
        while self.entries.len() > retention {
            if let Some((oldest, _)) = self.entries.pop_front() {
                self.instants.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn iter(&self) -> impl Iterator<Item = &(DateTime<FixedOffset>, T)> {
        self.entries.iter()
    }
}

#[derive(Debug, Default)]
struct State {
    configs: BTreeMap<ProbeKey, ProbeConfig>,
    readings: HashMap<ProbeKey, History<Reading>>,
    alerts: HashMap<ProbeKey, History<AlertRecord>>,
}

/// Merge per-probe histories into one list ordered by instant.
fn merged<'a, T: Clone + 'a>(histories: impl Iterator<Item = &'a History<T>>) -> Vec<T> {
    let mut entries: Vec<_> = histories.flat_map(|history| history.iter()).collect();
    entries.sort_by_key(|(at, _)| *at);
    entries.into_iter().map(|(_, entry)| entry.clone()).collect()
}

#[derive(Debug)]
pub struct MemoryRepository {
    state: RwLock<State>,
    retention: usize,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self {
            state: RwLock::new(State::default()),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = ProbeConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|config| (config.key(), config))
            .collect();
        Self {
            state: RwLock::new(State {
                configs,
                ..State::default()
            }),
            ..Self::default()
        }
    }

    /// Keep at most `per_probe` readings and alert records for each probe.
    pub fn with_retention(mut self, per_probe: usize) -> Self {
        self.retention = per_probe.max(1);
        self
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub async fn remove_probe_config(&self, key: &ProbeKey) -> Option<ProbeConfig> {
        self.state.write().await.configs.remove(key)
    }

    /// All retained readings, oldest first.
    pub async fn readings(&self) -> Vec<Reading> {
        merged(self.state.read().await.readings.values())
    }

    pub async fn readings_for(&self, key: &ProbeKey) -> Vec<Reading> {
        self.state
            .read()
            .await
            .readings
            .get(key)
            .map(|history| history.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn alert_records(&self) -> Vec<AlertRecord> {
        merged(self.state.read().await.alerts.values())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_probe_configs(&self) -> StorageResult<Vec<ProbeConfig>> {
        Ok(self.state.read().await.configs.values().cloned().collect())
    }

    async fn upsert_probe_config(&self, config: &ProbeConfig) -> StorageResult<()> {
        self.state
            .write()
            .await
            .configs
            .insert(config.key(), config.clone());
        Ok(())
    }

    async fn save_reading(&self, reading: &Reading) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let history = state.readings.entry(reading.key.clone()).or_default();
        if history.contains(&reading.recorded_at) {
            return Err(StorageError::Duplicate(format!(
                "reading {} at {}",
                reading.key,
                format_timestamp(&reading.recorded_at)
            )));
        }

        let evicted = history.push(reading.recorded_at, reading.clone(), self.retention);
        debug!("stored reading for {}", reading.key);
        if evicted > 0 {
            trace!("evicted {evicted} old reading(s) of {}", reading.key);
        }
        Ok(())
    }

    async fn save_alert_record(&self, record: &AlertRecord) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let history = state.alerts.entry(record.key.clone()).or_default();
        if history.contains(&record.occurred_at) {
            return Err(StorageError::Duplicate(format!(
                "alert {} at {}",
                record.key,
                format_timestamp(&record.occurred_at)
            )));
        }

        history.push(record.occurred_at, record.clone(), self.retention);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        let readings: usize = state.readings.values().map(History::len).sum();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory repository operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("probes".to_string(), state.configs.len().to_string()),
                ("readings".to_string(), readings.to_string()),
                ("retention".to_string(), self.retention.to_string()),
            ]),
        })
    }
}
