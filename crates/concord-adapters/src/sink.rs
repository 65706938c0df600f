//! Downstream delivery of approved corrections.

use crate::client::{http_client, redact_body};
use crate::config::SinkConfig;
use async_trait::async_trait;
use concord_core::{CorrectionPayload, DownstreamSink, SinkReceipt};
use std::sync::Mutex;

/// Posts correction payloads to a webhook. One try; failures come back in the receipt.
pub struct WebhookSink {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn from_config(config: &SinkConfig) -> anyhow::Result<Option<Self>> {
        let Some(url) = config.webhook_url.clone() else {
            return Ok(None);
        };
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        Ok(Some(Self {
            url,
            api_key,
            client: http_client(config.timeout_secs)?,
        }))
    }
}

#[async_trait]
impl DownstreamSink for WebhookSink {
    async fn send_correction(&self, payload: &CorrectionPayload) -> SinkReceipt {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => SinkReceipt::delivered(),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                SinkReceipt::failed(format!(
                    "webhook returned {}: {}",
                    status,
                    redact_body(&body)
                ))
            }
            Err(err) => SinkReceipt::failed(format!("webhook request failed: {}", err)),
        }
    }
}

/// Keeps payloads in memory; used when no webhook is configured and in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<CorrectionPayload>>,
    fail_with: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail_with: Some(error.into()),
        }
    }

    pub fn delivered(&self) -> Vec<CorrectionPayload> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DownstreamSink for RecordingSink {
    async fn send_correction(&self, payload: &CorrectionPayload) -> SinkReceipt {
        if let Some(error) = &self.fail_with {
            return SinkReceipt::failed(error.clone());
        }
        match self.delivered.lock() {
            Ok(mut delivered) => {
                delivered.push(payload.clone());
                SinkReceipt::delivered()
            }
            Err(_) => SinkReceipt::failed("recording sink lock poisoned"),
        }
    }
}
