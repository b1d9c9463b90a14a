//! Webhook forwarder: single POST with a compact JSON summary, for block/flag alerts.

use super::{ForwardEvent, Sink};
use crate::errors::ForwarderError;

pub struct WebhookSink {
    target_id: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(target_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Sink for WebhookSink {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn deliver(&self, batch: &[ForwardEvent]) -> Result<(), (bool, String)> {
        // Webhooks alert per-event; a "batch" here is usually size 1, but we
        // still send each as its own compact summary POST.
        for event in batch {
            let response = self
                .client
                .post(&self.url)
                .json(event)
                .send()
                .await
                .map_err(|e| (true, format!("network error: {e}")))?;

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ForwarderError::classify_http_status(status, text).into_retry_outcome());
            }
        }
        Ok(())
    }
}
