//! JSONL-file forwarder: appends to a local file with periodic fsync.

use super::{ForwardEvent, Sink};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub struct JsonlFileSink {
    target_id: String,
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlFileSink {
    pub fn open(target_id: impl Into<String>, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            target_id: target_id.into(),
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl Sink for JsonlFileSink {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn deliver(&self, batch: &[ForwardEvent]) -> Result<(), (bool, String)> {
        let mut file = self.file.lock().map_err(|_| (false, "poisoned lock".to_string()))?;
        for event in batch {
            let line = serde_json::to_string(event).map_err(|e| (false, e.to_string()))?;
            file.write_all(line.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|e| (true, e.to_string()))?;
        }
        file.sync_all().map_err(|e| (true, e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Action;

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlFileSink::open("file-sink", &path).unwrap();
        let event = ForwardEvent::from_decision(
            "r1",
            "a1",
            "/e",
            "outbound",
            "excerpt",
            &crate::engine::Decision {
                action: Action::Block,
                rule_ids: vec!["A".into()],
                shadow_applied: false,
                enforced_action: Action::Block,
            },
        );
        sink.deliver(&[event.clone(), event]).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
