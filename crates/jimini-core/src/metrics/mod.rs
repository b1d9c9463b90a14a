//! Metrics & SARIF export (C6): in-memory counters, ring buffer, SARIF projection.

pub mod sarif;

use crate::rules::{Action, Direction};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const RING_BUFFER_CAPACITY: usize = 100;

/// Composite counter key (spec §3: endpoint, direction, decision, rule_id?).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub endpoint: String,
    pub direction: Direction,
    pub action: Action,
    pub rule_id: Option<String>,
}

/// A snapshot entry in the introspection ring buffer.
#[derive(Debug, Clone)]
pub struct RingEntry {
    pub agent_id: String,
    pub action: Action,
    pub rule_ids: Vec<String>,
    pub excerpt: String,
}

/// Monotonic counters keyed by composite tuple, plus a bounded ring buffer of
/// recent decisions (spec §4.6). Reset only by explicit administrative
/// action.
#[derive(Default)]
pub struct Metrics {
    counters: DashMap<CounterKey, AtomicU64>,
    total_by_decision: DashMap<Action, AtomicU64>,
    by_endpoint: DashMap<String, AtomicU64>,
    by_direction: DashMap<Direction, AtomicU64>,
    by_rule: DashMap<String, AtomicU64>,
    shadow_override_enforced: AtomicU64,
    llm_unavailable: AtomicU64,
    dlq_depth: AtomicU64,
    ring: Mutex<VecDeque<RingEntry>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn incr<K: std::hash::Hash + Eq + Clone>(map: &DashMap<K, AtomicU64>, key: K) {
        map.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
    }

    /// Records one evaluation: total-by-decision, by-rule (one per fired
    /// rule), by-endpoint, by-direction, and the shadow-override-enforced
    /// counter when applicable (spec §4.6).
    #[allow(clippy::too_many_arguments)]
    pub fn record_decision(
        &self,
        endpoint: &str,
        direction: Direction,
        action: Action,
        rule_ids: &[String],
        agent_id: &str,
        excerpt: &str,
        shadow_override_enforced: bool,
    ) {
        Self::incr(&self.total_by_decision, action);
        Self::incr(&self.by_endpoint, endpoint.to_string());
        Self::incr(&self.by_direction, direction);
        for rule_id in rule_ids {
            Self::incr(&self.by_rule, rule_id.clone());
            Self::incr(
                &self.counters,
                CounterKey {
                    endpoint: endpoint.to_string(),
                    direction,
                    action,
                    rule_id: Some(rule_id.clone()),
                },
            );
        }
        Self::incr(
            &self.counters,
            CounterKey {
                endpoint: endpoint.to_string(),
                direction,
                action,
                rule_id: None,
            },
        );
        if shadow_override_enforced {
            self.shadow_override_enforced.fetch_add(1, Ordering::Relaxed);
        }

        let mut ring = self.ring.lock().expect("ring buffer lock poisoned");
        if ring.len() >= RING_BUFFER_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(RingEntry {
            agent_id: agent_id.to_string(),
            action,
            rule_ids: rule_ids.to_vec(),
            excerpt: excerpt.to_string(),
        });
    }

    pub fn record_llm_unavailable(&self) {
        self.llm_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_dlq_depth(&self, depth: u64) {
        self.dlq_depth.store(depth, Ordering::Relaxed);
    }

    pub fn total_by_decision(&self, action: Action) -> u64 {
        self.total_by_decision
            .get(&action)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn by_rule(&self, rule_id: &str) -> u64 {
        self.by_rule
            .get(rule_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn by_endpoint(&self, endpoint: &str) -> u64 {
        self.by_endpoint
            .get(endpoint)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn shadow_override_enforced_count(&self) -> u64 {
        self.shadow_override_enforced.load(Ordering::Relaxed)
    }

    pub fn llm_unavailable_count(&self) -> u64 {
        self.llm_unavailable.load(Ordering::Relaxed)
    }

    pub fn dlq_depth(&self) -> u64 {
        self.dlq_depth.load(Ordering::Relaxed)
    }

    /// The last `N=100` decisions, most recent last.
    pub fn recent(&self) -> Vec<RingEntry> {
        self.ring.lock().expect("ring buffer lock poisoned").iter().cloned().collect()
    }

    /// Administrative reset of all counters and the ring buffer.
    pub fn reset(&self) {
        self.counters.clear();
        self.total_by_decision.clear();
        self.by_endpoint.clear();
        self.by_direction.clear();
        self.by_rule.clear();
        self.shadow_override_enforced.store(0, Ordering::Relaxed);
        self.llm_unavailable.store(0, Ordering::Relaxed);
        self.ring.lock().expect("ring buffer lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_one_increment_per_dimension() {
        let metrics = Metrics::new();
        metrics.record_decision(
            "/e",
            Direction::Outbound,
            Action::Block,
            &["RULE-1".to_string(), "RULE-2".to_string()],
            "agent-1",
            "excerpt",
            false,
        );
        assert_eq!(metrics.total_by_decision(Action::Block), 1);
        assert_eq!(metrics.by_rule("RULE-1"), 1);
        assert_eq!(metrics.by_rule("RULE-2"), 1);
        assert_eq!(metrics.by_endpoint("/e"), 1);
    }

    #[test]
    fn ring_buffer_is_bounded_to_100() {
        let metrics = Metrics::new();
        for i in 0..150 {
            metrics.record_decision(
                "/e",
                Direction::Outbound,
                Action::Allow,
                &[],
                &format!("agent-{i}"),
                "x",
                false,
            );
        }
        assert_eq!(metrics.recent().len(), 100);
        assert_eq!(metrics.recent().last().unwrap().agent_id, "agent-149");
    }

    #[test]
    fn reset_clears_counters_and_ring() {
        let metrics = Metrics::new();
        metrics.record_decision("/e", Direction::Outbound, Action::Block, &[], "a", "x", false);
        metrics.reset();
        assert_eq!(metrics.total_by_decision(Action::Block), 0);
        assert!(metrics.recent().is_empty());
    }

    #[test]
    fn shadow_override_counter_increments_only_when_applicable() {
        let metrics = Metrics::new();
        metrics.record_decision("/e", Direction::Outbound, Action::Block, &[], "a", "x", true);
        metrics.record_decision("/e", Direction::Outbound, Action::Block, &[], "a", "x", false);
        assert_eq!(metrics.shadow_override_enforced_count(), 1);
    }
}
