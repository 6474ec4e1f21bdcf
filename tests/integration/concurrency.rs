//! Scheduler lifecycle and shutdown behaviour
//!
//! - stop() waits for an in-flight cycle but not for notifications
//! - start() and stop() are idempotent
//! - both loops tick independently

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use probe_monitoring::{
    Classification, ProbeKey,
    actors::{Scheduler, SchedulerState},
    config::PollingConfig,
    events::{EngineEvent, EventKind},
    notifier::NoopNotifier,
    storage::MemoryRepository,
};

use crate::helpers::*;

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0])]);
    let scheduler = Scheduler::new(
        fast_settings(),
        repository.clone(),
        transport.clone(),
        Arc::new(NoopNotifier),
    );

    assert_eq!(scheduler.state(), SchedulerState::Idle);

    // stopping an idle scheduler does nothing
    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    scheduler.start().await;
    assert_eq!(scheduler.state(), SchedulerState::Running);
    let after_first_start = transport.polls();
    assert_eq!(after_first_start, 1, "start runs one immediate poll");

    scheduler.start().await;
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert_eq!(repository.readings().await.len(), 1, "second start is a no-op");

    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    // no loop survives stop()
    let polls = transport.polls();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.polls(), polls);
}

#[tokio::test]
async fn test_scheduler_can_restart() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0])]);
    let scheduler = Scheduler::new(
        fast_settings(),
        repository.clone(),
        transport,
        Arc::new(NoopNotifier),
    );

    scheduler.start().await;
    scheduler.stop().await;
    scheduler.start().await;
    assert_eq!(scheduler.state(), SchedulerState::Running);
    scheduler.stop().await;

    assert!(repository.readings().await.len() >= 2);
}

#[tokio::test]
async fn test_abandoned_start_leaves_scheduler_idle() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0])]);
    let settings = PollingConfig {
        startup_delay_secs: 2,
        ..fast_settings()
    };
    let scheduler = Scheduler::new(
        settings,
        repository.clone(),
        transport.clone(),
        Arc::new(NoopNotifier),
    );

    // give up on start() while it is still in its startup delay
    let abandoned = tokio::time::timeout(Duration::from_millis(200), scheduler.start()).await;
    assert!(abandoned.is_err());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(transport.polls(), 0);

    // a later start() is not mistaken for a second one
    scheduler.start().await;
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert_eq!(transport.polls(), 1);
    assert_eq!(repository.readings().await.len(), 1);

    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_cycle() {
    let repository = Arc::new(SlowRepository::new(
        [probe("10.0.0.5", 1, "Freezer 1", 20.0, 30.0)],
        Duration::from_millis(800),
    ));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0])]);
    let scheduler = Scheduler::new(
        fast_settings(),
        repository.clone(),
        transport,
        Arc::new(NoopNotifier),
    );

    scheduler.start().await;
    assert_eq!(repository.saves_finished.load(Ordering::SeqCst), 1);

    // wait for the poll loop to be inside a write
    let mid_cycle = eventually(Duration::from_secs(5), || {
        let started = repository.saves_started.load(Ordering::SeqCst);
        started > repository.saves_finished.load(Ordering::SeqCst)
    })
    .await;
    assert!(mid_cycle, "poll loop never started a second cycle");

    scheduler.stop().await;

    assert_eq!(
        repository.saves_started.load(Ordering::SeqCst),
        repository.saves_finished.load(Ordering::SeqCst),
        "stop() returned while a write was still running"
    );
    assert_eq!(repository.inner.readings().await.len(), 2);
}

#[tokio::test]
async fn test_stop_does_not_wait_for_notifications() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![35.0])]);
    let notifier = Arc::new(RecordingNotifier::slow(Duration::from_secs(5)));
    let scheduler = Scheduler::new(
        fast_settings(),
        repository.clone(),
        transport,
        notifier.clone(),
    );

    let started = Instant::now();
    scheduler.start().await;
    scheduler.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "shutdown waited for detached notifications"
    );

    let stats = scheduler.dispatch_stats();
    assert_eq!(stats.spawned, 2, "one reading and one alert");
    assert_eq!(stats.in_flight(), 2);
    assert_eq!(notifier.reading_count(), 0);

    // the cycle itself completed
    assert_eq!(repository.readings().await.len(), 1);
    assert_eq!(
        scheduler.alert_state(&ProbeKey::new("10.0.0.5", 1)),
        Some(Classification::High)
    );
}

#[tokio::test]
async fn test_both_loops_tick_independently() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0])]);
    let settings = PollingConfig {
        poll_interval_secs: 60,
        ..fast_settings()
    };
    let scheduler = Scheduler::new(settings, repository.clone(), transport, Arc::new(NoopNotifier));
    let mut events = scheduler.subscribe(&[EventKind::DataSaved, EventKind::TemperatureUpdate]);

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await;

    let mut saved = 0;
    let mut updates = 0;
    while let Some(event) = events.try_recv() {
        match event {
            EngineEvent::DataSaved(_) => saved += 1,
            EngineEvent::TemperatureUpdate(snapshot) => {
                assert_eq!(snapshot.len(), 1);
                updates += 1;
            }
        }
    }

    // only the initial poll-and-save ran, the alert check kept ticking
    assert_eq!(saved, 1);
    assert!(updates >= 2, "alert check ran {updates} time(s)");
    assert_eq!(repository.readings().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_manual_cycles_share_state() {
    let repository = Arc::new(MemoryRepository::with_configs([
        probe("10.0.0.5", 1, "Freezer 1", 20.0, 30.0),
        probe("10.0.0.6", 1, "Cold Room", 2.0, 8.0),
    ]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![40.0])]);
    transport.script("10.0.0.6", [Script::Values(vec![12.0])]);
    let scheduler = Arc::new(Scheduler::new(
        fast_settings(),
        repository,
        transport,
        Arc::new(NoopNotifier),
    ));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let scheduler = scheduler.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let summary = scheduler.poll_now().await.unwrap();
                summary.alerts
            } else {
                let summary = scheduler.check_now().await.unwrap();
                summary.alerts
            }
        }));
    }

    let mut alerts = 0;
    for task in tasks {
        alerts += task.await.unwrap();
    }

    // two probes went high once each, however the cycles interleaved
    assert_eq!(alerts, 2);
    assert_eq!(scheduler.alert_states().len(), 2);
}
