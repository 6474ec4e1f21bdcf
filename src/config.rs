use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::ProbeConfig;
use crate::util::{get_default_port, get_legacy_api_token, get_legacy_api_url, get_port};

/// Repository configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory repository (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database file
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./probes.db")
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierConfig {
    LegacyApi { url: String, token: String },
}

/// Cadences, timeouts and protocol settings of the polling engine.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub poll_interval_secs: u64,
    pub alert_interval_secs: u64,
    /// Per-endpoint timeout in poll-and-save cycles
    pub save_timeout_secs: u64,
    /// Per-endpoint timeout in alert-check cycles
    pub alert_timeout_secs: u64,
    pub startup_delay_secs: u64,
    pub notification_timeout_secs: u64,
    pub command: String,
    pub port: u16,
    pub utc_offset_hours: i32,
    pub sanity_ceiling: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            alert_interval_secs: 5,
            save_timeout_secs: 5,
            alert_timeout_secs: 3,
            startup_delay_secs: 3,
            notification_timeout_secs: crate::alerts::DEFAULT_NOTIFICATION_TIMEOUT.as_secs(),
            command: crate::protocol::DEFAULT_COMMAND.to_string(),
            port: get_default_port(),
            utc_offset_hours: 7,
            sanity_ceiling: crate::monitors::reading::DEFAULT_SANITY_CEILING,
        }
    }
}

impl PollingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_interval_secs.max(1))
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs(self.save_timeout_secs.max(1))
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_timeout_secs.max(1))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,

    /// Repository configuration (defaults to SQLite)
    pub storage: Option<StorageConfig>,

    pub notifier: Option<NotifierConfig>,

    /// Probe configurations written to the repository on startup
    pub probes: Option<Vec<ProbeConfig>>,
}

impl Config {
    /// Apply `DEFAULT_TCP_PORT`, `LEGACY_API_URL` and `LEGACY_API_TOKEN`.
    ///
    /// The URL and token replace the file's notifier only when both are set.
    pub fn apply_env(mut self) -> Self {
        if let Some(port) = get_port() {
            self.polling.port = port;
        }

        if let (Some(url), Some(token)) = (get_legacy_api_url(), get_legacy_api_token()) {
            self.notifier = Some(NotifierConfig::LegacyApi { url, token });
        }

        self
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .context("Invalid configuration file provided!")
        .inspect(|config| trace!("loaded config: {config:?}"))
}
