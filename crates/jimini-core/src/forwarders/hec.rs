//! Splunk-style HEC forwarder: POST newline-delimited JSON to a token-authed endpoint.

use super::{ForwardEvent, Sink};
use crate::errors::ForwarderError;

pub struct HecSink {
    target_id: String,
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl HecSink {
    pub fn new(target_id: impl Into<String>, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            endpoint: endpoint.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Sink for HecSink {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn deliver(&self, batch: &[ForwardEvent]) -> Result<(), (bool, String)> {
        let body = batch
            .iter()
            .map(|e| serde_json::to_string(&serde_json::json!({ "event": e })))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| (false, e.to_string()))?
            .join("\n");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Splunk {}", self.token))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| (true, format!("network error: {e}")))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ForwarderError::classify_http_status(status, text).into_retry_outcome())
        }
    }
}
