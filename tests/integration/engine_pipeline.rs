//! End-to-end cycles: transport → processing → repository → alerts → events

use std::collections::HashMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use probe_monitoring::{
    Classification, ProbeConfig, ProbeKey,
    events::{DataSavedEvent, EngineEvent, EventKind},
    storage::MemoryRepository,
};

use crate::helpers::*;

#[tokio::test]
async fn test_threshold_walk_emits_alerts_and_recoveries() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "10.0.0.5",
        [
            Script::Values(vec![18.0]),
            Script::Values(vec![25.0]),
            Script::Values(vec![32.0]),
            Script::Values(vec![24.0]),
        ],
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine(repository.clone(), transport.clone(), notifier.clone());

    let mut alerts = 0;
    let mut recoveries = 0;
    for _ in 0..3 {
        let summary = engine.poll_and_save().await.unwrap();
        assert_eq!(summary.saved, 1);
        alerts += summary.alerts;
        recoveries += summary.recoveries;
    }
    assert_eq!(alerts, 2);
    assert_eq!(recoveries, 1);

    // back inside the range after the high alert
    let summary = engine.poll_and_save().await.unwrap();
    assert_eq!(summary.alerts, 0);
    assert_eq!(summary.recoveries, 1);

    let key = ProbeKey::new("10.0.0.5", 1);
    assert_eq!(
        engine.tracker().store().get(&key),
        Some(Classification::Normal)
    );

    // only alerts are recorded, in order
    let records = repository.alert_records().await;
    let directions: Vec<_> = records.iter().map(|r| r.direction).collect();
    assert_eq!(directions, vec![Classification::Low, Classification::High]);
    assert_eq!(records[1].value, 32.0);
    assert_eq!(records[1].max, 30.0);

    settle(&engine).await;
    let statuses: Vec<_> = notifier
        .alert_payloads()
        .into_iter()
        .map(|p| (p.status, p.alert_type))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("00000011".to_string(), "low".to_string()),
            ("00000001".to_string(), "normal".to_string()),
            ("00000010".to_string(), "high".to_string()),
            ("00000001".to_string(), "normal".to_string()),
        ]
    );
    assert_eq!(notifier.reading_count(), 4);
}

#[tokio::test]
async fn test_poll_and_save_persists_and_notifies_readings() {
    let calibrated = ProbeConfig {
        calibration_offset: Some(-1.5),
        ..probe("10.0.0.5", 1, "Freezer 1", 20.0, 30.0)
    };
    let repository = Arc::new(MemoryRepository::with_configs([
        calibrated,
        probe("10.0.0.5", 2, "Freezer 2", 20.0, 30.0),
    ]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "10.0.0.5",
        [Script::Frame(two_probe_frame(raw_for(25.0), raw_for(25.74)))],
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine(repository.clone(), transport.clone(), notifier.clone());

    let summary = engine.poll_and_save().await.unwrap();
    assert_eq!(summary.endpoints, 1);
    assert_eq!(summary.saved, 2);
    assert_eq!(summary.errors, 0);
    assert_eq!(transport.polls(), 1, "one round-trip serves both probes");

    let first = repository.readings_for(&ProbeKey::new("10.0.0.5", 1)).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].value, 23.5);
    assert_eq!(first[0].raw_value, 6500);
    assert_eq!(first[0].mcu_id, "A");
    assert_eq!(first[0].classification, Classification::Normal);

    let second = repository.readings_for(&ProbeKey::new("10.0.0.5", 2)).await;
    assert_eq!(second[0].value, 25.74);
    assert_eq!(second[0].mcu_id, "B");

    settle(&engine).await;
    let readings = notifier.readings.lock().unwrap().clone();
    assert_eq!(readings.len(), 2);
    let payload = readings
        .iter()
        .find(|p| p.mcu_id == "Freezer 1")
        .unwrap();
    assert_eq!(payload.status, "00000110");
    assert_eq!(payload.temp_value, 23.5);
    assert_eq!(payload.real_value, 6500);
    assert_eq!(payload.date.len(), 8);
    assert_eq!(payload.time.len(), 2);
}

#[tokio::test]
async fn test_data_saved_event_after_every_cycle() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "10.0.0.5",
        [Script::Values(vec![22.0]), Script::Unreachable],
    );
    let engine = engine(
        repository,
        transport,
        Arc::new(probe_monitoring::notifier::NoopNotifier),
    );
    let mut subscription = engine.events().subscribe(&[EventKind::DataSaved]);

    engine.poll_and_save().await.unwrap();
    assert_eq!(
        subscription.try_recv(),
        Some(EngineEvent::DataSaved(DataSavedEvent {
            saved: 1,
            errors: 0
        }))
    );

    // nothing reachable, still reported
    let summary = engine.poll_and_save().await.unwrap();
    assert_eq!(summary.unreachable, 1);
    assert_eq!(
        subscription.try_recv(),
        Some(EngineEvent::DataSaved(DataSavedEvent {
            saved: 0,
            errors: 0
        }))
    );
    assert_eq!(subscription.try_recv(), None);
}

#[tokio::test]
async fn test_alert_check_publishes_snapshot_without_saving() {
    let repository = Arc::new(MemoryRepository::with_configs([
        probe("10.0.0.5", 1, "Freezer 1", 20.0, 30.0),
        probe("10.0.0.5", 2, "Freezer 2", 20.0, 30.0),
        probe("10.0.0.6", 1, "Cold Room", 2.0, 8.0),
    ]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0, 31.5])]);
    transport.script("10.0.0.6", [Script::Values(vec![5.0])]);
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine(repository.clone(), transport, notifier.clone());

    let mut updates = engine.events().subscribe(&[EventKind::TemperatureUpdate]);
    let mut saves = engine.events().subscribe(&[EventKind::DataSaved]);

    let summary = engine.check_alerts().await.unwrap();
    assert_eq!(summary.endpoints, 2);
    assert_eq!(summary.evaluated, 3);
    assert_eq!(summary.alerts, 1);

    let snapshot = assert_matches!(
        updates.try_recv(),
        Some(EngineEvent::TemperatureUpdate(s)) => s
    );
    let entries: Vec<_> = snapshot
        .iter()
        .map(|u| (u.name.as_str(), u.value, u.classification))
        .collect();
    assert_eq!(
        entries,
        vec![
            ("Freezer 1", 25.0, Classification::Normal),
            ("Freezer 2", 31.5, Classification::High),
            ("Cold Room", 5.0, Classification::Normal),
        ]
    );
    assert!(snapshot.iter().all(|u| u.timestamp.len() == 19));

    assert_eq!(saves.try_recv(), None);
    assert!(repository.readings().await.is_empty());
    assert_eq!(repository.alert_records().await.len(), 1);

    // every evaluated probe now has a tracked state
    assert_eq!(
        engine.tracker().store().snapshot(),
        HashMap::from([
            (ProbeKey::new("10.0.0.5", 1), Classification::Normal),
            (ProbeKey::new("10.0.0.5", 2), Classification::High),
            (ProbeKey::new("10.0.0.6", 1), Classification::Normal),
        ])
    );

    settle(&engine).await;
    assert_eq!(notifier.snapshots.lock().unwrap().len(), 1);
    assert_eq!(notifier.reading_count(), 0);
    assert_eq!(notifier.alert_payloads().len(), 1);
}

#[tokio::test]
async fn test_empty_alert_check_publishes_nothing() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Unreachable]);
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine(repository, transport, notifier.clone());
    let mut updates = engine.events().subscribe(&[EventKind::TemperatureUpdate]);

    let summary = engine.check_alerts().await.unwrap();
    assert_eq!(summary.unreachable, 1);
    assert_eq!(updates.try_recv(), None);

    settle(&engine).await;
    assert!(notifier.snapshots.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_both_cycles_share_alert_state() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "10.0.0.5",
        [Script::Values(vec![35.0]), Script::Values(vec![36.0])],
    );
    let engine = engine(
        repository.clone(),
        transport,
        Arc::new(RecordingNotifier::new()),
    );

    let check = engine.check_alerts().await.unwrap();
    assert_eq!(check.alerts, 1);

    // already high: the save cycle sees no change
    let summary = engine.poll_and_save().await.unwrap();
    assert_eq!(summary.alerts, 0);
    assert_eq!(summary.saved, 1);
    assert_eq!(repository.readings().await[0].classification, Classification::High);
}

#[tokio::test]
async fn test_unknown_probe_number_borrows_endpoint_config() {
    let repository = Arc::new(MemoryRepository::with_configs([probe(
        "10.0.0.5", 1, "Freezer 1", 20.0, 30.0,
    )]));
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("10.0.0.5", [Script::Values(vec![25.0, 40.0])]);
    let engine = engine(
        repository.clone(),
        transport,
        Arc::new(RecordingNotifier::new()),
    );

    let summary = engine.poll_and_save().await.unwrap();
    assert_eq!(summary.saved, 2);
    assert_eq!(summary.alerts, 1);

    let borrowed = repository.readings_for(&ProbeKey::new("10.0.0.5", 2)).await;
    assert_eq!(borrowed.len(), 1);
    assert_eq!(borrowed[0].name, "Freezer 1");
    assert_eq!(borrowed[0].classification, Classification::High);
}
