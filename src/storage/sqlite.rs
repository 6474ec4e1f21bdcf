//! SQLite repository
//!
//! Embedded database in WAL mode with migrations applied on open. Readings and
//! alert records are keyed by probe plus microsecond timestamp; collisions
//! surface as [`StorageError::Duplicate`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, Repository};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRecord, format_timestamp, parse_classification, parse_timestamp};
use crate::{ProbeConfig, ProbeKey, Reading, SensorType};

pub struct SqliteRepository {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteRepository {
    /// Open (or create) the database at `db_path` and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        info!("opening SQLite repository at: {db_path}");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("SQLite repository ready");

        Ok(Self { pool, db_path })
    }

    fn probe_no(row: &SqliteRow) -> StorageResult<u8> {
        let probe_no: i64 = row.try_get("probe_no")?;
        u8::try_from(probe_no)
            .map_err(|_| StorageError::Corrupt(format!("probe number {probe_no} out of range")))
    }

    fn config_from_row(row: &SqliteRow) -> StorageResult<ProbeConfig> {
        let sensor_type: String = row.try_get("sensor_type")?;
        Ok(ProbeConfig {
            ip: row.try_get("ip")?,
            probe_no: Self::probe_no(row)?,
            name: row.try_get("name")?,
            sensor_type: SensorType::from_code(&sensor_type),
            min_threshold: row.try_get("min_threshold")?,
            max_threshold: row.try_get("max_threshold")?,
            calibration_offset: row.try_get("calibration_offset")?,
        })
    }

    fn reading_from_row(row: &SqliteRow) -> StorageResult<Reading> {
        let status: String = row.try_get("status")?;
        let sent_at: String = row.try_get("sent_at")?;
        let recorded_at: String = row.try_get("recorded_at")?;
        Ok(Reading {
            key: ProbeKey::new(row.try_get::<String, _>("ip")?, Self::probe_no(row)?),
            name: row.try_get("name")?,
            mcu_id: row.try_get("mcu_id")?,
            raw_value: row.try_get("raw_value")?,
            value: row.try_get("value")?,
            classification: parse_classification(&status)?,
            sent_at: parse_timestamp(&sent_at)?,
            recorded_at: parse_timestamp(&recorded_at)?,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertRecord> {
        let sensor_type: String = row.try_get("sensor_type")?;
        let direction: String = row.try_get("direction")?;
        let occurred_at: String = row.try_get("occurred_at")?;
        Ok(AlertRecord {
            key: ProbeKey::new(row.try_get::<String, _>("ip")?, Self::probe_no(row)?),
            name: row.try_get("name")?,
            sensor_type: SensorType::from_code(&sensor_type),
            direction: parse_classification(&direction)?,
            value: row.try_get("value")?,
            min: row.try_get("min_threshold")?,
            max: row.try_get("max_threshold")?,
            occurred_at: parse_timestamp(&occurred_at)?,
        })
    }

    /// Most recent readings for one probe, oldest first.
    #[instrument(skip(self), fields(probe = %key))]
    pub async fn latest_readings(
        &self,
        key: &ProbeKey,
        limit: usize,
    ) -> StorageResult<Vec<Reading>> {
        let rows = sqlx::query(
            r#"
            SELECT ip, probe_no, recorded_at, name, mcu_id, raw_value, value, status, sent_at
            FROM reading
            WHERE ip = ? AND probe_no = ?
            ORDER BY recorded_at DESC
            LIMIT ?
            "#,
        )
        .bind(&key.ip)
        .bind(i64::from(key.probe_no))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut readings = rows
            .iter()
            .map(Self::reading_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        readings.reverse();
        Ok(readings)
    }

    pub async fn alert_records(&self, key: &ProbeKey) -> StorageResult<Vec<AlertRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT ip, probe_no, occurred_at, name, sensor_type, direction,
                   value, min_threshold, max_threshold
            FROM alert_record
            WHERE ip = ? AND probe_no = ?
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(&key.ip)
        .bind(i64::from(key.probe_no))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    pub async fn close(&self) {
        info!("closing SQLite repository");
        self.pool.close().await;
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    #[instrument(skip(self))]
    async fn list_probe_configs(&self) -> StorageResult<Vec<ProbeConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT ip, probe_no, name, sensor_type, min_threshold, max_threshold, calibration_offset
            FROM probe_config
            ORDER BY ip, probe_no
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let configs = rows
            .iter()
            .filter_map(|row| match Self::config_from_row(row) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("skipping unreadable probe config row: {e}");
                    None
                }
            })
            .collect();
        Ok(configs)
    }

    #[instrument(skip(self, config), fields(probe = %config.key()))]
    async fn upsert_probe_config(&self, config: &ProbeConfig) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO probe_config (
                ip, probe_no, name, sensor_type, min_threshold, max_threshold, calibration_offset
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ip, probe_no) DO UPDATE SET
                name = excluded.name,
                sensor_type = excluded.sensor_type,
                min_threshold = excluded.min_threshold,
                max_threshold = excluded.max_threshold,
                calibration_offset = excluded.calibration_offset
            "#,
        )
        .bind(&config.ip)
        .bind(i64::from(config.probe_no))
        .bind(&config.name)
        .bind(config.sensor_type.code())
        .bind(config.min_threshold)
        .bind(config.max_threshold)
        .bind(config.calibration_offset)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, reading), fields(probe = %reading.key))]
    async fn save_reading(&self, reading: &Reading) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reading (
                ip, probe_no, recorded_at, name, mcu_id, raw_value, value,
                status, sent_at, s_date, s_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reading.key.ip)
        .bind(i64::from(reading.key.probe_no))
        .bind(format_timestamp(&reading.recorded_at))
        .bind(&reading.name)
        .bind(&reading.mcu_id)
        .bind(reading.raw_value)
        .bind(reading.value)
        .bind(reading.classification.code())
        .bind(format_timestamp(&reading.sent_at))
        .bind(reading.sent_at.format("%Y%m%d").to_string())
        .bind(reading.sent_at.format("%H").to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, record), fields(probe = %record.key))]
    async fn save_alert_record(&self, record: &AlertRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_record (
                ip, probe_no, occurred_at, name, sensor_type, direction,
                value, min_threshold, max_threshold
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.key.ip)
        .bind(i64::from(record.key.probe_no))
        .bind(format_timestamp(&record.occurred_at))
        .bind(&record.name)
        .bind(record.sensor_type.code())
        .bind(record.direction.code())
        .bind(record.value)
        .bind(record.min)
        .bind(record.max)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite repository operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {e}");
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {e}"),
                    metadata: HashMap::new(),
                })
            }
        }
    }
}
