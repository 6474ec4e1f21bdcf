//! HTTP notifier for the legacy reporting API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, instrument};

use super::{Notifier, NotifyError};
use crate::alerts::{AlertPayload, ReadingPayload};

const READING_PATH: &str = "/legacy/templog";
const ALERT_PATH: &str = "/legacy/templog/alert/notification";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs JSON payloads with a bearer token. Enabled only when both the base
/// URL and the token are non-empty.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    base_url: String,
    token: String,
}

impl WebhookNotifier {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    #[instrument(skip(self, payload))]
    async fn post<T: Serialize + Sync>(&self, path: &str, payload: &T) -> Result<(), NotifyError> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .inspect_err(|e| error!("failed to send to {url}: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            error!("{url} answered with status: {status}");
            return Err(NotifyError::HttpStatus(status.as_u16()));
        }

        debug!("delivered to {url}");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn is_enabled(&self) -> bool {
        !self.base_url.is_empty() && !self.token.is_empty()
    }

    async fn send_reading(&self, payload: &ReadingPayload) -> Result<(), NotifyError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.post(READING_PATH, payload).await
    }

    async fn send_alert(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.post(ALERT_PATH, payload).await
    }
}
