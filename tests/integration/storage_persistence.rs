//! Engine cycles against the SQLite repository

use std::sync::Arc;

use pretty_assertions::assert_eq;
use probe_monitoring::{
    Classification, ProbeKey,
    notifier::NoopNotifier,
    storage::{Repository, sqlite::SqliteRepository},
};
use tempfile::TempDir;

use crate::helpers::*;

async fn open(dir: &TempDir) -> Arc<SqliteRepository> {
    let repository = SqliteRepository::new(dir.path().join("probes.db"))
        .await
        .expect("failed to open test database");
    Arc::new(repository)
}

#[tokio::test]
async fn test_cycles_persist_readings_and_alerts() {
    let dir = TempDir::new().unwrap();
    let repository = open(&dir).await;
    repository
        .upsert_probe_config(&probe("10.0.0.5", 1, "Freezer 1", 20.0, 30.0))
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "10.0.0.5",
        [
            Script::Values(vec![25.0]),
            Script::Values(vec![33.5]),
            Script::Values(vec![26.0]),
        ],
    );
    let engine = engine(repository.clone(), transport, Arc::new(NoopNotifier));

    for _ in 0..3 {
        let summary = engine.poll_and_save().await.unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.errors, 0);
    }

    let key = ProbeKey::new("10.0.0.5", 1);
    let readings = repository.latest_readings(&key, 10).await.unwrap();
    let values: Vec<_> = readings
        .iter()
        .map(|r| (r.value, r.classification))
        .collect();
    assert_eq!(
        values,
        vec![
            (25.0, Classification::Normal),
            (33.5, Classification::High),
            (26.0, Classification::Normal),
        ]
    );

    let alerts = repository.alert_records(&key).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].direction, Classification::High);
    assert_eq!(alerts[0].value, 33.5);

    repository.close().await;
}

#[tokio::test]
async fn test_probe_configs_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let repository = open(&dir).await;
    repository
        .upsert_probe_config(&probe("10.0.0.5", 1, "Freezer 1", 20.0, 30.0))
        .await
        .unwrap();
    repository
        .upsert_probe_config(&probe("10.0.0.5", 1, "Freezer A", -25.0, -15.0))
        .await
        .unwrap();
    repository.close().await;

    let reopened = open(&dir).await;
    let configs = reopened.list_probe_configs().await.unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].name, "Freezer A");
    assert_eq!(configs[0].min(), -25.0);
    reopened.close().await;
}
