//! Elastic-style forwarder: bulk index API.

use super::{ForwardEvent, Sink};
use crate::errors::ForwarderError;

pub struct ElasticSink {
    target_id: String,
    bulk_endpoint: String,
    index: String,
    client: reqwest::Client,
}

impl ElasticSink {
    pub fn new(target_id: impl Into<String>, bulk_endpoint: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            bulk_endpoint: bulk_endpoint.into(),
            index: index.into(),
            client: reqwest::Client::new(),
        }
    }

    fn bulk_body(&self, batch: &[ForwardEvent]) -> Result<String, String> {
        let mut body = String::new();
        for event in batch {
            let action = serde_json::json!({ "index": { "_index": self.index } });
            body.push_str(&serde_json::to_string(&action).map_err(|e| e.to_string())?);
            body.push('\n');
            body.push_str(&serde_json::to_string(event).map_err(|e| e.to_string())?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl Sink for ElasticSink {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn deliver(&self, batch: &[ForwardEvent]) -> Result<(), (bool, String)> {
        let body = self.bulk_body(batch).map_err(|e| (false, e))?;

        let response = self
            .client
            .post(&self.bulk_endpoint)
            .header("Content-Type", "application/x-ndjson")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Action;

    #[test]
    fn bulk_body_has_two_lines_per_event() {
        let sink = ElasticSink::new("es", "http://localhost/_bulk", "jimini");
        let event = ForwardEvent::from_decision(
            "r1",
            "a1",
            "/e",
            "outbound",
            "excerpt",
            &crate::engine::Decision {
                action: Action::Flag,
                rule_ids: vec![],
                shadow_applied: false,
                enforced_action: Action::Flag,
            },
        );
        let body = sink.bulk_body(&[event]).unwrap();
        assert_eq!(body.lines().count(), 2);
    }
}
