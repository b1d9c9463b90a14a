//! Resilience kit (C4): circuit breaker, retry, dead-letter queue.

pub mod breaker;
pub mod dlq;
pub mod retry;

pub use breaker::{Admission, BreakerConfig, BreakerOpen, BreakerPhase, CircuitBreaker};
pub use dlq::{DeadLetterEntry, DeadLetterQueue};
pub use retry::RetryPolicy;

use std::future::Future;
use std::time::Duration;

/// Runs `op` under `breaker` for `target`, retrying transient failures per
/// `retry` with backoff+jitter between attempts; a permanent failure or an
/// exhausted retry budget routes the payload to `dlq` (spec §4.4/§4.5).
///
/// `op` returns `Ok(T)` on success or `Err((transient, message))` on failure,
/// where `transient` decides whether another attempt is worth making.
pub async fn run_with_resilience<T, F, Fut>(
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    dlq: &DeadLetterQueue,
    target: &str,
    payload: Vec<u8>,
    mut op: F,
) -> Result<T, BreakerOpen>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, (bool, String)>>,
{
    for attempt in 1..=retry.max_attempts {
        let admission = match breaker.admit(target) {
            Ok(a) => a,
            Err(open) => {
                dlq.enqueue(target, payload, attempt, "breaker open".to_string());
                return Err(open);
            }
        };
        match op().await {
            Ok(value) => {
                admission.success();
                return Ok(value);
            }
            Err((transient, message)) => {
                admission.failure();
                if !transient {
                    dlq.enqueue(target, payload, attempt, message);
                    return Err(BreakerOpen(target.to_string()));
                }
                if attempt == retry.max_attempts {
                    dlq.enqueue(target, payload, attempt, message);
                    return Err(BreakerOpen(target.to_string()));
                }
                tokio::time::sleep(delay_or_zero(retry, attempt)).await;
            }
        }
    }
    unreachable!("loop always returns within max_attempts iterations")
}

fn delay_or_zero(retry: &RetryPolicy, attempt: u32) -> Duration {
    retry.delay_for_attempt(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let dlq = DeadLetterQueue::new();
        let attempts = AtomicU32::new(0);

        let result: Result<&str, BreakerOpen> = run_with_resilience(
            &breaker,
            &retry,
            &dlq,
            "svc",
            b"payload".to_vec(),
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err((true, "temporary".to_string()))
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(dlq.depth(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_goes_straight_to_dlq() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let retry = RetryPolicy::default();
        let dlq = DeadLetterQueue::new();

        let result: Result<(), BreakerOpen> = run_with_resilience(
            &breaker,
            &retry,
            &dlq,
            "svc",
            b"payload".to_vec(),
            || async { Err((false, "bad request".to_string())) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(dlq.depth(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_go_to_dlq() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let dlq = DeadLetterQueue::new();

        let result: Result<(), BreakerOpen> = run_with_resilience(
            &breaker,
            &retry,
            &dlq,
            "svc",
            b"payload".to_vec(),
            || async { Err((true, "still failing".to_string())) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(dlq.depth(), 1);
    }

    #[tokio::test]
    async fn open_breaker_skips_retry_and_routes_to_dlq_immediately() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        breaker.admit("svc").unwrap().failure();
        assert_eq!(breaker.phase("svc"), BreakerPhase::Open);

        let retry = RetryPolicy::default();
        let dlq = DeadLetterQueue::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), BreakerOpen> = run_with_resilience(
            &breaker,
            &retry,
            &dlq,
            "svc",
            b"payload".to_vec(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
