//! Evaluation façade (C8): the single operation exposed to the transport layer.

use crate::audit::{record_for_decision, AuditChain};
use crate::engine::{evaluate, Decision, EvaluationRequest, ShadowMode};
use crate::errors::JiminiError;
use crate::forwarders::{ForwardEvent, Forwarder};
use crate::hooks::{constant_time_eq, Authorizer, LlmCapability, Redactor};
use crate::metrics::Metrics;
use crate::rules::RuleLoader;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything the façade needs beyond the request itself.
pub struct Facade {
    rules: Arc<RuleLoader>,
    audit: Arc<AuditChain>,
    metrics: Arc<Metrics>,
    forwarders: Vec<Arc<Forwarder>>,
    webhook: Option<Arc<Forwarder>>,
    shadow_mode: ShadowMode,
    configured_api_key: Option<String>,
    authorizer: Option<Arc<dyn Authorizer>>,
    redactor: Option<Arc<dyn Redactor>>,
    llm: Option<Arc<dyn LlmCapability>>,
}

impl Facade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<RuleLoader>,
        audit: Arc<AuditChain>,
        metrics: Arc<Metrics>,
        forwarders: Vec<Arc<Forwarder>>,
        webhook: Option<Arc<Forwarder>>,
        shadow_mode: ShadowMode,
        configured_api_key: Option<String>,
        authorizer: Option<Arc<dyn Authorizer>>,
        redactor: Option<Arc<dyn Redactor>>,
        llm: Option<Arc<dyn LlmCapability>>,
    ) -> Self {
        Self {
            rules,
            audit,
            metrics,
            forwarders,
            webhook,
            shadow_mode,
            configured_api_key,
            authorizer,
            redactor,
            llm,
        }
    }

    /// The façade's metrics sink, for admin/introspection endpoints.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn authorize(&self, credential: &str) -> Result<(), JiminiError> {
        if let Some(authorizer) = &self.authorizer {
            return match authorizer.authorize(credential).await {
                Some(_) => Ok(()),
                None => Err(JiminiError::Unauthorized),
            };
        }
        match &self.configured_api_key {
            Some(expected) if constant_time_eq(expected, credential) => Ok(()),
            Some(_) => Err(JiminiError::Unauthorized),
            // no API key configured: authorization is not enforced
            None => Ok(()),
        }
    }

    /// Authorize → evaluate → audit → count → fan out → return (spec §4.8).
    ///
    /// Honors `deadline`: if it elapses before the audit append completes,
    /// returns `DeadlineExceeded` and no audit record is written (spec §5).
    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
        credential: &str,
        deadline: Duration,
    ) -> Result<Decision, JiminiError> {
        tokio::time::timeout(deadline, self.evaluate_inner(request, credential))
            .await
            .map_err(|_| JiminiError::DeadlineExceeded)?
    }

    async fn evaluate_inner(
        &self,
        mut request: EvaluationRequest,
        credential: &str,
    ) -> Result<Decision, JiminiError> {
        self.authorize(credential).await?;

        if let Some(redactor) = &self.redactor {
            request.text = redactor.redact(&request.text);
        }

        let rule_set = self.rules.active();
        let decision = evaluate(&request, &rule_set, self.shadow_mode, self.llm.as_deref()).await;

        let draft = record_for_decision(
            &request.request_id,
            &request.agent_id,
            request.direction,
            &request.endpoint,
            &request.text,
            &decision,
            BTreeMap::new(),
        );
        let record = self
            .audit
            .append(draft)
            .map_err(|_| JiminiError::Internal("audit append failed".to_string()))?;

        // A rule fired under global shadow mode but stayed enforced (its own
        // `shadow_override: enforce` beat the global downgrade) — distinct
        // from `shadow_applied`, which is true when the downgrade happened.
        let shadow_override_enforced =
            self.shadow_mode.0 && !decision.rule_ids.is_empty() && !decision.shadow_applied;
        self.metrics.record_decision(
            &request.endpoint,
            request.direction,
            decision.action,
            &decision.rule_ids,
            &request.agent_id,
            &record.text_excerpt,
            shadow_override_enforced,
        );

        let event = ForwardEvent::from_decision(
            &request.request_id,
            &request.agent_id,
            &request.endpoint,
            &format!("{:?}", request.direction).to_lowercase(),
            &record.text_excerpt,
            &decision,
        );
        for forwarder in &self.forwarders {
            forwarder.enqueue(event.clone());
        }
        if matches!(decision.action, crate::rules::Action::Block | crate::rules::Action::Flag) {
            if let Some(webhook) = &self.webhook {
                webhook.enqueue(event);
            }
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, Direction, RuleLoader};

    fn facade(audit_path: &std::path::Path) -> Facade {
        let loader = Arc::new(RuleLoader::new());
        loader
            .load("rules:\n  - id: IL-AI-4.2\n    action: block\n    pattern: '\\b\\d{3}-\\d{2}-\\d{4}\\b'\n")
            .unwrap();
        let audit = Arc::new(AuditChain::open(audit_path).unwrap());
        let metrics = Arc::new(Metrics::new());
        Facade::new(
            loader,
            audit,
            metrics,
            vec![],
            None,
            ShadowMode(false),
            None,
            None,
            None,
            None,
        )
    }

    fn request(text: &str) -> EvaluationRequest {
        EvaluationRequest {
            text: text.to_string(),
            direction: Direction::Outbound,
            endpoint: "/test".to_string(),
            agent_id: "agent-1".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    #[tokio::test]
    async fn evaluate_without_api_key_configured_is_unauthenticated_but_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let f = facade(&dir.path().join("audit.jsonl"));
        let decision = f
            .evaluate(request("hello"), "any-credential", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(decision.action, Action::Allow);
    }

    #[tokio::test]
    async fn evaluate_appends_exactly_one_audit_record() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");
        let f = facade(&audit_path);
        f.evaluate(request("My SSN is 123-45-6789"), "cred", Duration::from_secs(1))
            .await
            .unwrap();
        let outcome = AuditChain::open(&audit_path).unwrap().verify().unwrap();
        assert_eq!(outcome.count, 1);
        assert!(outcome.valid);
    }

    struct SlowAuthorizer;

    #[async_trait::async_trait]
    impl crate::hooks::Authorizer for SlowAuthorizer {
        async fn authorize(&self, _credential: &str) -> Option<crate::hooks::Principal> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(crate::hooks::Principal { id: "agent-1".to_string() })
        }
    }

    #[tokio::test]
    async fn deadline_exceeded_writes_no_audit_record() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");
        let loader = Arc::new(RuleLoader::new());
        loader
            .load("rules:\n  - id: IL-AI-4.2\n    action: block\n    pattern: '\\b\\d{3}-\\d{2}-\\d{4}\\b'\n")
            .unwrap();
        let audit = Arc::new(AuditChain::open(&audit_path).unwrap());
        let metrics = Arc::new(Metrics::new());
        let f = Facade::new(
            loader,
            audit,
            metrics,
            vec![],
            None,
            ShadowMode(false),
            None,
            Some(Arc::new(SlowAuthorizer)),
            None,
            None,
        );
        let result = f
            .evaluate(request("hello"), "cred", Duration::from_millis(1))
            .await;
        assert!(matches!(result, Err(JiminiError::DeadlineExceeded)));
        let outcome = AuditChain::open(&audit_path).unwrap().verify().unwrap();
        assert_eq!(outcome.count, 0);
    }

    #[tokio::test]
    async fn wrong_api_key_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(RuleLoader::new());
        loader.load("rules:\n  - id: A\n    action: block\n    max_chars: 1\n").unwrap();
        let audit = Arc::new(AuditChain::open(dir.path().join("audit.jsonl")).unwrap());
        let metrics = Arc::new(Metrics::new());
        let f = Facade::new(
            loader,
            audit,
            metrics,
            vec![],
            None,
            ShadowMode(false),
            Some("correct-key".to_string()),
            None,
            None,
            None,
        );
        let result = f.evaluate(request("x"), "agent-1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(JiminiError::Unauthorized)));
    }
}
