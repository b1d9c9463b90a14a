//! Per-target circuit breaker: closed / open / half-open (spec §4.4).

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_probe_limit: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_probe_limit: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct TargetState {
    phase: BreakerPhase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            phase: BreakerPhase::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_inflight: 0,
        }
    }
}

/// Raised when an operation is rejected because its target's breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for target '{0}'")]
pub struct BreakerOpen(pub String);

/// A guard admitted through a half-open probe slot; records the outcome on
/// drop-equivalent explicit calls (`success`/`failure`).
pub struct Admission<'a> {
    target: String,
    breaker: &'a CircuitBreaker,
    was_half_open: bool,
}

impl<'a> Admission<'a> {
    pub fn success(self) {
        self.breaker.on_success(&self.target, self.was_half_open);
    }

    pub fn failure(self) {
        self.breaker.on_failure(&self.target, self.was_half_open);
    }
}

/// Per-target breaker state, behind a concurrent map so many forwarders can
/// share one breaker instance (spec §9: "many-writer counters" design note
/// applied to per-target state).
#[derive(Default)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    targets: DashMap<String, Mutex<TargetState>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            targets: DashMap::new(),
        }
    }

    fn entry(&self, target: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<TargetState>> {
        self.targets
            .entry(target.to_string())
            .or_default();
        self.targets.get(target).expect("just inserted")
    }

    /// Requests admission for an operation against `target`. Rejects with
    /// [`BreakerOpen`] in the `open` phase, or when `half_open` probe
    /// capacity is exhausted.
    pub fn admit(&self, target: &str) -> Result<Admission<'_>, BreakerOpen> {
        let entry = self.entry(target);
        let mut state = entry.lock().expect("breaker lock poisoned");

        if state.phase == BreakerPhase::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    state.phase = BreakerPhase::HalfOpen;
                    state.half_open_inflight = 0;
                }
            }
        }

        match state.phase {
            BreakerPhase::Open => Err(BreakerOpen(target.to_string())),
            BreakerPhase::HalfOpen => {
                if state.half_open_inflight >= self.config.half_open_probe_limit {
                    Err(BreakerOpen(target.to_string()))
                } else {
                    state.half_open_inflight += 1;
                    drop(state);
                    Ok(Admission {
                        target: target.to_string(),
                        breaker: self,
                        was_half_open: true,
                    })
                }
            }
            BreakerPhase::Closed => {
                drop(state);
                Ok(Admission {
                    target: target.to_string(),
                    breaker: self,
                    was_half_open: false,
                })
            }
        }
    }

    fn on_success(&self, target: &str, was_half_open: bool) {
        let entry = self.entry(target);
        let mut state = entry.lock().expect("breaker lock poisoned");
        if was_half_open {
            state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
        }
        state.phase = BreakerPhase::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    fn on_failure(&self, target: &str, was_half_open: bool) {
        let entry = self.entry(target);
        let mut state = entry.lock().expect("breaker lock poisoned");
        if was_half_open {
            state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
            state.phase = BreakerPhase::Open;
            state.opened_at = Some(Instant::now());
            return;
        }
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.failure_threshold {
            state.phase = BreakerPhase::Open;
            state.opened_at = Some(Instant::now());
        }
    }

    pub fn phase(&self, target: &str) -> BreakerPhase {
        let entry = self.entry(target);
        let phase = entry.lock().expect("breaker lock poisoned").phase;
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        for _ in 0..3 {
            breaker.admit("svc").unwrap().failure();
        }
        assert_eq!(breaker.phase("svc"), BreakerPhase::Open);
        assert!(breaker.admit("svc").is_err());
    }

    #[test]
    fn half_open_allows_one_probe_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
            half_open_probe_limit: 1,
        });
        breaker.admit("svc").unwrap().failure();
        assert!(breaker.admit("svc").is_err());

        std::thread::sleep(Duration::from_millis(20));
        let admission = breaker.admit("svc").expect("probe admitted");
        assert!(breaker.admit("svc").is_err(), "second concurrent probe rejected");
        admission.success();
        assert_eq!(breaker.phase("svc"), BreakerPhase::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
            half_open_probe_limit: 1,
        });
        breaker.admit("svc").unwrap().failure();
        std::thread::sleep(Duration::from_millis(20));
        breaker.admit("svc").unwrap().failure();
        assert_eq!(breaker.phase("svc"), BreakerPhase::Open);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        breaker.admit("svc").unwrap().failure();
        breaker.admit("svc").unwrap().success();
        breaker.admit("svc").unwrap().failure();
        breaker.admit("svc").unwrap().failure();
        assert_eq!(breaker.phase("svc"), BreakerPhase::Closed);
    }
}
