//! Repository trait definition

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::AlertRecord;
use crate::{ProbeConfig, Reading};

/// Health status of a repository
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Backend-specific details
    pub metadata: HashMap<String, String>,
}

/// Persistence consumed by the polling engine.
///
/// Probe configuration is read fresh every cycle. Writes of readings and
/// alert records report key collisions as [`StorageError::Duplicate`], which
/// callers treat as a benign skip.
///
/// [`StorageError::Duplicate`]: super::StorageError::Duplicate
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_probe_configs(&self) -> StorageResult<Vec<ProbeConfig>>;

    /// Insert or replace the configuration for `(ip, probe_no)`.
    async fn upsert_probe_config(&self, config: &ProbeConfig) -> StorageResult<()>;

    async fn save_reading(&self, reading: &Reading) -> StorageResult<()>;

    async fn save_alert_record(&self, record: &AlertRecord) -> StorageResult<()>;

    /// Lightweight liveness probe, run once at engine start.
    async fn health_check(&self) -> StorageResult<HealthStatus>;
}
