//! Notification sinks
//!
//! A [`Notifier`] delivers reading and alert payloads to an external system.
//! Calls are best-effort: errors go back to the caller, nothing is retried.

pub mod webhook;

use std::fmt;

use async_trait::async_trait;

use crate::alerts::{AlertPayload, ReadingPayload};
use crate::events::TemperatureUpdateEvent;

pub use webhook::WebhookNotifier;

#[derive(Debug)]
pub enum NotifyError {
    /// Transport-level failure (connect, TLS, timeout, body)
    Request(reqwest::Error),

    /// The endpoint answered with a non-2xx status
    HttpStatus(u16),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Request(err) => write!(f, "request failed: {err}"),
            NotifyError::HttpStatus(status) => write!(f, "request failed with status: {status}"),
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Request(err) => Some(err),
            NotifyError::HttpStatus(_) => None,
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Request(err)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Disabled notifiers are skipped without spawning any work.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn send_reading(&self, payload: &ReadingPayload) -> Result<(), NotifyError>;

    async fn send_alert(&self, payload: &AlertPayload) -> Result<(), NotifyError>;

    /// Live snapshot from an alert-check cycle. Only push-style sinks (e.g. a
    /// message broker) care about it.
    async fn publish_snapshot(
        &self,
        _snapshot: &[TemperatureUpdateEvent],
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Used when nothing is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn send_reading(&self, _payload: &ReadingPayload) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn send_alert(&self, _payload: &AlertPayload) -> Result<(), NotifyError> {
        Ok(())
    }
}
