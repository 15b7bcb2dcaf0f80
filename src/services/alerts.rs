// src/services/alerts.rs

//! Alert formatting and dispatch.

use std::fmt;
#[cfg(test)]
use std::sync::Mutex;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::utils::http::{self, RetryPolicy};

/// A notification about one clinic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Count reached the up threshold
    Up { name: String, count: u32, link: String },
    /// Count fell to the down threshold from above it
    Down { name: String, count: u32, link: String },
    /// Clinic vanished from the search results
    Removed { name: String },
}

impl Alert {
    pub fn name(&self) -> &str {
        match self {
            Self::Up { name, .. } | Self::Down { name, .. } | Self::Removed { name } => name,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Up { .. } => "UP",
            Self::Down { .. } => "DOWN",
            Self::Removed { .. } => "REMOVED",
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up { name, count, link } => write!(
                f,
                "{count} available appointments at {name}!\n\n\
                 Link to register: {link}\n\n\
                 Keep hitting refresh! It's likely appointments will become available!"
            ),
            Self::Down { name, count, link } => write!(
                f,
                "{count} available appointments at {name}.\n\n\
                 Unfortunately it's probably a waste of time to try to get an appointment now.\n\n\
                 If you want to try anyway: {link}"
            ),
            Self::Removed { name } => write!(
                f,
                "{name} removed from search results. No appointments available now."
            ),
        }
    }
}

/// Destination for formatted alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Posts alerts to a webhook as a `content` form field.
pub struct WebhookAlerter {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookAlerter {
    pub fn new(client: Client, url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            url: url.into(),
            retry,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlerter {
    async fn send(&self, message: &str) -> Result<()> {
        log::info!("{}", message);
        let response = http::send_with_retry(&self.retry, || {
            self.client.post(&self.url).form(&[("content", message)])
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Dispatch {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Logs alerts without sending them (dry-run mode).
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl AlertSink for LogAlerter {
    async fn send(&self, message: &str) -> Result<()> {
        log::info!("[dry-run] {}", message);
        Ok(())
    }
}

/// Keeps every alert in memory; optionally fails every send.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingAlerter {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
}

#[cfg(test)]
impl RecordingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every message.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl AlertSink for RecordingAlerter {
    async fn send(&self, message: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Dispatch { status: 503 });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.to_string());
        }
        Ok(())
    }
}
