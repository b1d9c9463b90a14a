//! Retry with exponential backoff and full jitter (spec §4.4).

use rand::Rng;
use std::time::Duration;

/// Retry policy: up to `max_attempts` attempts on transient errors, with
/// `base * 2^(attempt-1)` backoff plus uniform jitter in `[0, delay]`,
/// bounded by `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// The bounded, pre-jitter delay for `attempt` (1-indexed).
    pub fn base_for_attempt(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let millis = self
            .base_delay
            .as_millis()
            .saturating_mul(exp as u128)
            .min(self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// `base_for_attempt` plus uniform jitter in `[0, delay]`, still bounded
    /// by `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_for_attempt(attempt);
        let jitter_millis = if base.as_millis() == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base.as_millis() as u64)
        };
        let total = base.as_millis() as u64 + jitter_millis;
        Duration::from_millis(total.min(self.max_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles_each_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.base_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.base_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.base_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn base_delay_is_bounded_by_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.base_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn jittered_delay_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(500),
        };
        for attempt in 1..=10 {
            let d = policy.delay_for_attempt(attempt);
            assert!(d <= Duration::from_millis(500));
        }
    }

}
