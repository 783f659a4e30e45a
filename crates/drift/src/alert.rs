//! Alert channel for tasks that were given up on.

use async_trait::async_trait;
use serde_json::json;
use snafu::prelude::*;
use std::time::Duration;
use tracing::{error, info, warn};

use drift_core::emit;
use drift_core::metrics::events::AlertRaised;

use crate::error::{AlertError, ClientSnafu, RequestSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Info,
}

impl Severity {
    fn emoji(&self) -> &'static str {
        match self {
            Severity::Error => ":red_circle:",
            Severity::Info => ":large_green_circle:",
        }
    }
}

/// Destination for operator alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, title: &str, message: &str, severity: Severity) -> Result<(), AlertError>;

    /// Send an alert, logging instead of failing when delivery does not work.
    async fn alert(&self, title: &str, message: &str, severity: Severity) {
        let delivered = match self.send(title, message, severity).await {
            Ok(()) => true,
            Err(e) => {
                warn!(title, error = %e, "Failed to deliver alert");
                false
            }
        };
        emit!(AlertRaised { delivered });
    }
}

/// Alerts written to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlert;

#[async_trait]
impl AlertChannel for LogAlert {
    async fn send(&self, title: &str, message: &str, severity: Severity) -> Result<(), AlertError> {
        match severity {
            Severity::Error => error!(title, message, "Alert"),
            Severity::Info => info!(title, message, "Alert"),
        }
        Ok(())
    }
}

/// Chat-style webhook accepting `{"text": ...}`.
pub struct WebhookAlert {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlert {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("drift/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(ClientSnafu)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Body posted to the webhook.
pub fn webhook_payload(title: &str, message: &str, severity: Severity) -> serde_json::Value {
    json!({ "text": format!("{} *{}*\n{}", severity.emoji(), title, message) })
}

#[async_trait]
impl AlertChannel for WebhookAlert {
    async fn send(&self, title: &str, message: &str, severity: Severity) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(&webhook_payload(title, message, severity))
            .send()
            .await
            .context(RequestSnafu)?;

        let status = response.status();
        ensure!(
            status.is_success(),
            crate::error::StatusSnafu {
                status: status.as_u16()
            }
        );
        Ok(())
    }
}
