//! Scheduler - owns the two periodic loops and their lifecycle
//!
//! ```text
//! start(): delay → health check → poll & save once → spawn loops
//!
//!   poll-and-save loop (every poll_interval)  ─┐
//!                                              ├─ AlertStateStore, EventBus
//!   alert-check loop  (every alert_interval)  ─┘
//!
//! stop(): cancel → wait for both loops to finish their current cycle
//! ```
//!
//! Cancellation is observed between cycles, never inside one. Detached
//! notification tasks are not waited for.

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::cycle::PollingEngine;
use super::messages::{AlertCheckSummary, CycleSummary, SchedulerState};
use crate::alerts::{DispatchStats, NotificationDispatcher};
use crate::config::PollingConfig;
use crate::events::{EventBus, EventKind, Subscription};
use crate::monitors::{AlertStateStore, AlertStateTracker};
use crate::notifier::Notifier;
use crate::probe::ProbeTransport;
use crate::storage::Repository;
use crate::{Classification, ProbeKey};

struct RunningLoops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    engine: PollingEngine,
    store: AlertStateStore,
    state: Arc<AtomicU8>,
    loops: Mutex<Option<RunningLoops>>,
}

impl Scheduler {
    pub fn new(
        settings: PollingConfig,
        repository: Arc<dyn Repository>,
        transport: Arc<dyn ProbeTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = AlertStateStore::new();
        let tracker =
            AlertStateTracker::with_sanity_ceiling(store.clone(), settings.sanity_ceiling);
        let dispatcher = NotificationDispatcher::new(notifier, settings.notification_timeout());
        let events = Arc::new(EventBus::default());

        let engine =
            PollingEngine::new(settings, repository, transport, tracker, events, dispatcher);

        Self {
            engine,
            store,
            state: Arc::new(AtomicU8::new(SchedulerState::Idle as u8)),
            loops: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.engine.events().clone()
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.engine.events().subscribe(kinds)
    }

    pub fn alert_state(&self, key: &ProbeKey) -> Option<Classification> {
        self.store.get(key)
    }

    pub fn alert_states(&self) -> &AlertStateStore {
        &self.store
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.engine.dispatcher().stats()
    }

    /// Start both loops. Does nothing if already running.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let mut loops = self.loops.lock().await;
        if loops.is_some() {
            debug!("scheduler already running");
            return;
        }

        let settings = self.engine.settings();
        info!("starting background polling");
        info!("- poll & save interval: every {:?}", settings.poll_interval());
        info!("- alert check interval: every {:?}", settings.alert_interval());
        if self.engine.dispatcher().is_enabled() {
            info!("- notifications: ENABLED");
        } else {
            info!("- notifications: DISABLED");
        }

        if !settings.startup_delay().is_zero() {
            info!("waiting {:?} for dependencies to settle", settings.startup_delay());
            tokio::time::sleep(settings.startup_delay()).await;
        }

        match self.engine.repository().health_check().await {
            Ok(health) if health.healthy => info!("repository: {}", health.message),
            Ok(health) => warn!("repository unhealthy: {}", health.message),
            Err(e) => warn!("repository health check failed: {e}"),
        }

        info!("running initial poll and save");
        guarded("initial poll-and-save", self.engine.poll_and_save()).await;

        let cancel = CancellationToken::new();
        let handles = vec![
            spawn_loop(
                "poll-and-save",
                settings.poll_interval(),
                cancel.clone(),
                self.engine.clone(),
                |engine| async move {
                    guarded("poll-and-save", engine.poll_and_save()).await;
                },
            ),
            spawn_loop(
                "alert-check",
                settings.alert_interval(),
                cancel.clone(),
                self.engine.clone(),
                |engine| async move {
                    guarded("alert-check", engine.check_alerts()).await;
                },
            ),
        ];

        // Running implies installed loops
        *loops = Some(RunningLoops { cancel, handles });
        self.set_state(SchedulerState::Running);
    }

    /// Cancel both loops and wait until each has finished its current cycle.
    /// Does nothing if not running.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut loops = self.loops.lock().await;
        let Some(RunningLoops { cancel, handles }) = loops.take() else {
            debug!("scheduler not running");
            return;
        };

        self.set_state(SchedulerState::Stopping);
        cancel.cancel();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("polling loop ended abnormally: {e}");
            }
        }

        self.set_state(SchedulerState::Idle);
        info!("polling service stopped");
    }

    /// Run one poll-and-save cycle now, outside the regular cadence.
    pub async fn poll_now(&self) -> Option<CycleSummary> {
        guarded("manual poll-and-save", self.engine.poll_and_save()).await
    }

    /// Run one alert-check cycle now.
    pub async fn check_now(&self) -> Option<AlertCheckSummary> {
        guarded("manual alert-check", self.engine.check_alerts()).await
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    engine: PollingEngine,
    cycle: F,
) -> JoinHandle<()>
where
    F: Fn(PollingEngine) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("{name} loop started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    cycle(engine.clone()).await;
                }
            }
        }

        debug!("{name} loop stopped");
    })
}

/// Run a cycle, containing both errors and panics at its boundary.
async fn guarded<T, E: Display>(
    name: &str,
    cycle: impl Future<Output = Result<T, E>>,
) -> Option<T> {
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            error!("{name} cycle failed: {e}");
            None
        }
        Err(panic) => {
            error!("PANIC in {name} cycle: {}", panic_message(&*panic));
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
