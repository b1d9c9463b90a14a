//! Forwarder pipeline (C5): fan out decision events to configured sinks.

pub mod elastic;
pub mod file;
pub mod hec;
pub mod webhook;

use crate::engine::Decision;
use crate::resilience::{CircuitBreaker, DeadLetterQueue, RetryPolicy};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A decision event as delivered to a forwarder (never the full request text
/// beyond the audit excerpt already computed — spec §4.5, webhook payloads
/// never carry full text).
#[derive(Debug, Clone, Serialize)]
pub struct ForwardEvent {
    pub request_id: String,
    pub agent_id: String,
    pub endpoint: String,
    pub direction: String,
    pub action: String,
    pub rule_ids: Vec<String>,
    pub excerpt: String,
}

impl ForwardEvent {
    pub fn from_decision(
        request_id: &str,
        agent_id: &str,
        endpoint: &str,
        direction: &str,
        excerpt: &str,
        decision: &Decision,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            agent_id: agent_id.to_string(),
            endpoint: endpoint.to_string(),
            direction: direction.to_string(),
            action: format!("{:?}", decision.action).to_lowercase(),
            rule_ids: decision.rule_ids.clone(),
            excerpt: excerpt.to_string(),
        }
    }
}

/// Implemented by each sink variant (file, HEC-style, Elastic-style, webhook).
///
/// `deliver` performs the actual outbound call and classifies failure as
/// transient/permanent for the resilience kit (spec §4.4/§4.5).
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    fn target_id(&self) -> &str;
    async fn deliver(&self, batch: &[ForwardEvent]) -> Result<(), (bool, String)>;
}

/// A bounded, drop-oldest-on-overflow queue with a single background flush
/// task per forwarder (spec §4.5 / §9: "coroutine/async fan-out" design note).
pub struct Forwarder {
    sink: Arc<dyn Sink>,
    queue: Mutex<VecDeque<ForwardEvent>>,
    capacity: usize,
    batch_size: usize,
    dropped: AtomicU64,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    dlq: Arc<DeadLetterQueue>,
}

impl Forwarder {
    pub fn new(
        sink: Arc<dyn Sink>,
        capacity: usize,
        batch_size: usize,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        dlq: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            sink,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            batch_size,
            dropped: AtomicU64::new(0),
            breaker,
            retry,
            dlq,
        }
    }

    /// Non-blocking enqueue. Beyond the bound, the oldest queued item is
    /// dropped and counted (spec §4.5).
    pub fn enqueue(&self, event: ForwardEvent) {
        let mut queue = self.queue.lock().expect("forwarder queue lock poisoned");
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().expect("forwarder queue lock poisoned").len()
    }

    fn take_batch(&self) -> Vec<ForwardEvent> {
        let mut queue = self.queue.lock().expect("forwarder queue lock poisoned");
        let n = self.batch_size.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Flushes up to one batch. Delivery is wrapped by the circuit breaker
    /// and retried per the resilience kit; permanent failures land in the
    /// DLQ and never propagate to the caller (spec §4.5/§7).
    pub async fn flush_once(&self) {
        let batch = self.take_batch();
        if batch.is_empty() {
            return;
        }
        let payload = serde_json::to_vec(&batch).unwrap_or_default();
        let sink = self.sink.clone();
        let target_id = sink.target_id().to_string();
        let batch_for_retry = batch.clone();
        let _ = crate::resilience::run_with_resilience(
            &self.breaker,
            &self.retry,
            &self.dlq,
            &target_id,
            payload,
            move || {
                let sink = sink.clone();
                let batch = batch_for_retry.clone();
                async move { sink.deliver(&batch).await }
            },
        )
        .await;
    }

    /// Attempts a final flush with a bounded deadline on orderly shutdown
    /// (spec §4.5).
    pub async fn shutdown(&self, deadline: std::time::Duration) {
        let _ = tokio::time::timeout(deadline, async {
            while self.queue_depth() > 0 {
                self.flush_once().await;
            }
        })
        .await;
    }
}
