//! Typed error taxonomy for the evaluation pipeline (spec §7).

use thiserror::Error;

/// Errors that can cross the evaluation/audit/config boundaries.
///
/// Forwarder and breaker failures never reach this type directly — they are
/// absorbed by the resilience kit and routed to the dead-letter queue or
/// counted, per spec §7 ("forwarder errors never propagate to the caller").
#[derive(Debug, Error)]
pub enum JiminiError {
    #[error("rule '{rule_id}' invalid in field '{field}': {message}")]
    RuleLoad {
        rule_id: String,
        field: String,
        message: String,
    },

    #[error("unauthorized")]
    Unauthorized,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("circuit open for target '{target}'")]
    BreakerOpen { target: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl JiminiError {
    /// Constructs a [`JiminiError::RuleLoad`] naming the offending rule and field.
    pub fn rule_load(
        rule_id: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RuleLoad {
            rule_id: rule_id.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Why a forwarded delivery ultimately failed (internal to the resilience kit;
/// never surfaced to the evaluation caller, per spec §7).
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("transient forwarder error: {0}")]
    Transient(String),

    #[error("permanent forwarder error: {0}")]
    Permanent(String),

    #[error("circuit open for target '{target}'")]
    BreakerOpen { target: String },
}

impl ForwarderError {
    /// A `4xx` (other than 408/429) or otherwise non-retriable failure is permanent.
    pub fn classify_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if (500..600).contains(&status) || status == 408 || status == 429 {
            Self::Transient(format!("status {status}: {body}"))
        } else {
            Self::Permanent(format!("status {status}: {body}"))
        }
    }

    /// Flattens to the `(transient, message)` shape [`Sink::deliver`] returns
    /// to the resilience kit.
    ///
    /// [`Sink::deliver`]: crate::forwarders::Sink::deliver
    pub fn into_retry_outcome(self) -> (bool, String) {
        match self {
            Self::Transient(message) => (true, message),
            Self::Permanent(message) => (false, message),
            Self::BreakerOpen { target } => (false, format!("circuit open for target '{target}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_5xx_and_408_429_as_transient() {
        for status in [500, 502, 503, 408, 429] {
            assert!(matches!(
                ForwarderError::classify_http_status(status, "x"),
                ForwarderError::Transient(_)
            ));
        }
    }

    #[test]
    fn classifies_other_4xx_as_permanent() {
        for status in [400, 401, 403, 404, 422] {
            assert!(matches!(
                ForwarderError::classify_http_status(status, "x"),
                ForwarderError::Permanent(_)
            ));
        }
    }
}
