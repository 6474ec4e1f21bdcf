//! PollingEngine - the bodies of the two periodic cycles
//!
//! ## Poll & Save
//!
//! ```text
//! list configs → group by ip → poll endpoints (concurrently)
//!     → per reading: process → save → notify (detached) → evaluate alert state
//!     → publish DataSavedEvent
//! ```
//!
//! ## Alert Check
//!
//! ```text
//! list configs → group by ip → poll endpoints (concurrently, shorter timeout)
//!     → per reading: process → evaluate alert state → collect snapshot
//!     → publish TemperatureUpdate (if non-empty)
//! ```
//!
//! A failing endpoint or write only affects its own readings. Configuration
//! is read fresh every cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use super::messages::{AlertCheckSummary, CycleSummary};
use crate::alerts::{AlertPayload, NotificationDispatcher, ReadingPayload};
use crate::config::PollingConfig;
use crate::events::{EngineEvent, EventBus, TemperatureUpdateEvent};
use crate::monitors::{AlertStateTracker, ProcessOutcome, ReadingProcessor, Transition};
use crate::probe::{PollResponse, ProbeError, ProbeTransport};
use crate::storage::{AlertRecord, Repository, StorageResult};
use crate::util::LocalClock;
use crate::{ProbeConfig, ProbeEndpoint, Reading};

const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything one cycle needs. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PollingEngine {
    settings: Arc<PollingConfig>,
    repository: Arc<dyn Repository>,
    transport: Arc<dyn ProbeTransport>,
    processor: ReadingProcessor,
    tracker: AlertStateTracker,
    events: Arc<EventBus>,
    dispatcher: NotificationDispatcher,
    clock: LocalClock,
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("settings", &self.settings)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Configs of one ip, in repository order.
type EndpointGroup = (String, Vec<ProbeConfig>);

impl PollingEngine {
    pub fn new(
        settings: PollingConfig,
        repository: Arc<dyn Repository>,
        transport: Arc<dyn ProbeTransport>,
        tracker: AlertStateTracker,
        events: Arc<EventBus>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            processor: ReadingProcessor::new(settings.sanity_ceiling),
            clock: LocalClock::from_hours(settings.utc_offset_hours),
            settings: Arc::new(settings),
            repository,
            transport,
            tracker,
            events,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &PollingConfig {
        &self.settings
    }

    pub fn tracker(&self) -> &AlertStateTracker {
        &self.tracker
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Poll every endpoint, persist accepted readings and publish a summary.
    ///
    /// Fails only when the probe configuration cannot be listed; nothing is
    /// published in that case.
    #[instrument(skip(self))]
    pub async fn poll_and_save(&self) -> StorageResult<CycleSummary> {
        let started = Instant::now();
        info!("=== Starting Poll & Save cycle ===");

        let groups = self.load_groups().await?;
        let sent_at = self.clock.now();

        let mut summary = CycleSummary {
            endpoints: groups.len(),
            ..CycleSummary::default()
        };

        for ((ip, configs), result) in self.poll_all(groups, self.settings.save_timeout()).await {
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!("{ip}: skipped this cycle: {e}");
                    summary.unreachable += 1;
                    continue;
                }
            };

            for raw in &response.readings {
                let Some(config) = resolve_config(&configs, raw.probe_no) else {
                    continue;
                };

                let value = match self.processor.process(&config, raw) {
                    ProcessOutcome::Accepted { value, classification } => {
                        let reading = Reading {
                            key: config.key(),
                            name: config.name.clone(),
                            mcu_id: raw.mcu_id.clone(),
                            raw_value: raw.raw_value,
                            value,
                            classification,
                            sent_at,
                            recorded_at: self.clock.now(),
                        };
                        self.save_reading(&config, &reading, &mut summary).await;
                        value
                    }
                    ProcessOutcome::SensorFault => {
                        summary.sensor_faults += 1;
                        continue;
                    }
                    ProcessOutcome::SanityExceeded(_) => {
                        summary.sanity_skips += 1;
                        continue;
                    }
                };

                match self.evaluate(&config, value).await {
                    Some(Transition::Alert { .. }) => summary.alerts += 1,
                    Some(Transition::Recovery { .. }) => summary.recoveries += 1,
                    None => {}
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            "=== Poll & Save completed in {:?}: saved {} logs, {} errors ===",
            summary.elapsed, summary.saved, summary.errors
        );

        let report = self
            .events
            .publish(EngineEvent::DataSaved(summary.data_saved_event()));
        debug!("data saved event: {report:?}");

        Ok(summary)
    }

    async fn save_reading(
        &self,
        config: &ProbeConfig,
        reading: &Reading,
        summary: &mut CycleSummary,
    ) {
        match self.repository.save_reading(reading).await {
            Ok(()) => {
                summary.saved += 1;
                info!(
                    "{} probe {}: {:.2}{} [{}]",
                    config.name,
                    config.probe_no,
                    reading.value,
                    config.sensor_type.unit(),
                    config.sensor_type.label()
                );
                self.dispatcher.dispatch_reading(ReadingPayload::new(
                    &config.name,
                    reading.value,
                    reading.raw_value,
                    &reading.sent_at,
                ));
            }
            Err(e) if e.is_duplicate() => {
                summary.duplicates += 1;
                warn!("duplicate log entry skipped for {} probe {}", config.name, config.probe_no);
            }
            Err(e) => {
                summary.errors += 1;
                error!("failed to save reading ({} probe {}): {e}", config.name, config.probe_no);
            }
        }
    }

    /// Poll every endpoint and run its readings through the alert state
    /// tracker, then publish the resulting snapshot.
    #[instrument(skip(self))]
    pub async fn check_alerts(&self) -> StorageResult<AlertCheckSummary> {
        let groups = self.load_groups().await?;
        let timestamp = self.clock.now().format(SNAPSHOT_TIMESTAMP_FORMAT).to_string();

        let mut summary = AlertCheckSummary {
            endpoints: groups.len(),
            ..AlertCheckSummary::default()
        };
        let mut snapshot = Vec::new();

        for ((ip, configs), result) in self.poll_all(groups, self.settings.alert_timeout()).await {
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    debug!("{ip}: no alert check this cycle: {e}");
                    summary.unreachable += 1;
                    continue;
                }
            };

            for raw in &response.readings {
                let Some(config) = resolve_config(&configs, raw.probe_no) else {
                    continue;
                };

                let (value, classification) = match self.processor.process(&config, raw) {
                    ProcessOutcome::Accepted { value, classification } => (value, classification),
                    ProcessOutcome::SensorFault => {
                        summary.sensor_faults += 1;
                        continue;
                    }
                    ProcessOutcome::SanityExceeded(_) => {
                        summary.sanity_skips += 1;
                        continue;
                    }
                };

                summary.evaluated += 1;
                match self.evaluate(&config, value).await {
                    Some(Transition::Alert { .. }) => summary.alerts += 1,
                    Some(Transition::Recovery { .. }) => summary.recoveries += 1,
                    None => {}
                }

                snapshot.push(TemperatureUpdateEvent {
                    name: config.name.clone(),
                    value,
                    classification,
                    timestamp: timestamp.clone(),
                });
            }
        }

        if !snapshot.is_empty() {
            self.dispatcher.dispatch_snapshot(snapshot.clone());
            let report = self.events.publish(EngineEvent::TemperatureUpdate(snapshot));
            debug!("temperature update: {report:?}");
        }

        Ok(summary)
    }

    /// Run one value through the alert state tracker and act on a transition:
    /// alerts are recorded and notified, recoveries only notified.
    async fn evaluate(&self, config: &ProbeConfig, value: f64) -> Option<Transition> {
        let transition = self.tracker.evaluate(config, value)?;
        let now = self.clock.now();

        if let Some(record) = AlertRecord::from_transition(&transition, now) {
            match self.repository.save_alert_record(&record).await {
                Ok(()) => {}
                Err(e) if e.is_duplicate() => {
                    debug!("duplicate alert record skipped for {}", record.key);
                }
                Err(e) => error!("failed to save alert record for {}: {e}", record.key),
            }
        }

        self.dispatcher
            .dispatch_alert(AlertPayload::from_transition(&transition, &now));

        Some(transition)
    }

    async fn load_groups(&self) -> StorageResult<Vec<EndpointGroup>> {
        let configs = self
            .repository
            .list_probe_configs()
            .await
            .inspect_err(|e| error!("failed to load probe configs: {e}"))?;

        let groups = group_by_ip(configs);
        debug!(
            "found {} unique ip(s) to poll ({} total probes)",
            groups.len(),
            groups.iter().map(|(_, configs)| configs.len()).sum::<usize>()
        );
        Ok(groups)
    }

    /// One request per endpoint, all in flight at once. Each is bounded by
    /// `timeout`, so a stalled device only delays its own readings.
    async fn poll_all(
        &self,
        groups: Vec<EndpointGroup>,
        timeout: Duration,
    ) -> Vec<(EndpointGroup, Result<PollResponse, ProbeError>)> {
        let polls = groups.into_iter().map(|group| async move {
            let endpoint = ProbeEndpoint::new(group.0.clone(), self.settings.port);
            let result = self
                .transport
                .poll(&endpoint, &self.settings.command, timeout)
                .await;
            (group, result)
        });

        join_all(polls).await
    }
}

/// Group configs by ip, keeping repository order within a group.
fn group_by_ip(configs: Vec<ProbeConfig>) -> Vec<EndpointGroup> {
    let mut groups: BTreeMap<String, Vec<ProbeConfig>> = BTreeMap::new();
    for config in configs {
        groups.entry(config.ip.clone()).or_default().push(config);
    }
    groups.into_iter().collect()
}

/// The config for a reported probe number. Unknown numbers borrow the first
/// config of the endpoint.
fn resolve_config(configs: &[ProbeConfig], probe_no: u8) -> Option<ProbeConfig> {
    configs
        .iter()
        .find(|config| config.probe_no == probe_no)
        .cloned()
        .or_else(|| configs.first().map(|first| first.for_probe(probe_no)))
}
