//! Dead-letter queue: append-only sink of abandoned outbound deliveries (spec §4.4).

use std::collections::VecDeque;
use std::sync::Mutex;

/// An outbound event whose delivery was abandoned.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub id: u64,
    pub target_id: String,
    pub payload: Vec<u8>,
    pub first_attempt_ts: chrono::DateTime<chrono::Utc>,
    pub attempts: u32,
    pub last_error: String,
}

/// An in-memory, append-only dead-letter queue.
///
/// `drain` marks entries visible for replay without removing them until the
/// caller [`acknowledge`]s their ids (spec §4.4: "replay is idempotent at the
/// DLQ level").
#[derive(Default)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    next_id: Mutex<u64>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(
        &self,
        target_id: impl Into<String>,
        payload: Vec<u8>,
        attempts: u32,
        last_error: impl Into<String>,
    ) -> u64 {
        let mut next_id = self.next_id.lock().expect("dlq id lock poisoned");
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let entry = DeadLetterEntry {
            id,
            target_id: target_id.into(),
            payload,
            first_attempt_ts: chrono::Utc::now(),
            attempts,
            last_error: last_error.into(),
        };
        self.entries
            .lock()
            .expect("dlq entries lock poisoned")
            .push_back(entry);
        id
    }

    /// Returns up to `batch_size` entries for `target` without removing them.
    pub fn drain(&self, target_id: &str, batch_size: usize) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .expect("dlq entries lock poisoned")
            .iter()
            .filter(|e| e.target_id == target_id)
            .take(batch_size)
            .cloned()
            .collect()
    }

    /// Removes acknowledged entries from the durable queue.
    pub fn acknowledge(&self, ids: &[u64]) {
        let mut entries = self.entries.lock().expect("dlq entries lock poisoned");
        entries.retain(|e| !ids.contains(&e.id));
    }

    pub fn depth(&self) -> usize {
        self.entries.lock().expect("dlq entries lock poisoned").len()
    }
}
