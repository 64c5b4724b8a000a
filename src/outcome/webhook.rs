//! HTTP client for the WEBHOOK outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POST `body` as JSON. Non-2xx answers are errors.
    async fn post(&self, uri: &str, body: &Value) -> Result<(), WebhookError>;
}

pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("notification-publisher/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn post(&self, uri: &str, body: &Value) -> Result<(), WebhookError> {
        let response = self.client.post(uri).json(body).send().await?;
        let status = response.status();
        response.error_for_status()?;
        tracing::debug!(uri = %uri, status = %status, "Webhook delivered");
        Ok(())
    }
}
