//! Hooks the core consumes from external collaborators (spec §6).
//!
//! Each optional integration is a trait whose "unavailable" case is a valued
//! result, never an error crossing the evaluation boundary (spec §9).

use async_trait::async_trait;
use std::time::Duration;

/// A caller identity established from a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
}

/// Authorizes a caller credential. When absent, the façade falls back to a
/// constant-time comparison against the configured API key (spec §6).
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, credential: &str) -> Option<Principal>;
}

/// Redacts request text before evaluation, when enabled. The core does not
/// prescribe redaction rules (spec §6).
pub trait Redactor: Send + Sync {
    fn redact(&self, text: &str) -> String;
}

/// Evaluates an `llm_prompt` rule condition against candidate text.
///
/// `Ok(false)` and `Err(_)` are both treated by the engine as "did not fire"
/// (fail-safe); only the implementer's metrics hook, if any, need to
/// distinguish them.
#[async_trait]
pub trait LlmCapability: Send + Sync {
    async fn evaluate(
        &self,
        prompt: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<bool, LlmUnavailable>;
}

/// The LLM capability is absent, timed out, or otherwise could not answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("llm capability unavailable: {0}")]
pub struct LlmUnavailable(pub String);

/// A constant-time API key comparator, used when no [`Authorizer`] is
/// installed (spec §6).
pub fn constant_time_eq(expected: &str, provided: &str) -> bool {
    let a = expected.as_bytes();
    let b = provided.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("secret", "secret"));
    }

    #[test]
    fn constant_time_eq_rejects_different_strings() {
        assert!(!constant_time_eq("secret", "secrets"));
        assert!(!constant_time_eq("secret", "wrong!"));
    }
}
