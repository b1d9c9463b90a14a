//! Audit chain (C3): a SHA3-256-linked, newline-delimited, append-only log.

use crate::engine::Decision;
use crate::errors::JiminiError;
use crate::rules::{Action, Direction};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 32 zero bytes: `previous_hash` of the first record in a chain.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// A single audit event: a decision, or an admin/security event carrying
/// only `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub request_id: String,
    pub agent_id: String,
    pub direction: Direction,
    pub endpoint: String,
    pub action: Action,
    pub rule_ids: Vec<String>,
    pub text_excerpt: String,
    pub text_hash: String,
    pub previous_hash: String,
    pub chain_hash: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn sha3_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical, order-stable serialization. A direct `to_string` on a derived
/// struct emits fields in declaration order, not sorted order, so the value
/// is first converted to a [`serde_json::Value`] — whose `Object` variant is
/// `BTreeMap`-backed in this workspace (no `preserve_order` feature enabled)
/// — and serialized from there, which sorts keys recursively with no
/// insignificant whitespace.
fn canonical(value: &impl Serialize) -> String {
    let value = serde_json::to_value(value).expect("audit record always converts to a value");
    serde_json::to_string(&value).expect("audit record value always serializes")
}

/// Builds an [`AuditRecord`] for a completed evaluation, excerpting the first
/// 200 characters and hashing the full input.
pub fn record_for_decision(
    request_id: &str,
    agent_id: &str,
    direction: Direction,
    endpoint: &str,
    text: &str,
    decision: &Decision,
    metadata: BTreeMap<String, serde_json::Value>,
) -> AuditRecordDraft {
    let text_excerpt: String = text.chars().take(200).collect();
    AuditRecordDraft {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        request_id: request_id.to_string(),
        agent_id: agent_id.to_string(),
        direction,
        endpoint: endpoint.to_string(),
        action: decision.action,
        rule_ids: decision.rule_ids.clone(),
        text_excerpt,
        text_hash: sha3_hex(text.as_bytes()),
        metadata,
    }
}

/// An [`AuditRecord`] without its hash fields, the input to [`AuditChain::append`].
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecordDraft {
    pub timestamp: String,
    pub request_id: String,
    pub agent_id: String,
    pub direction: Direction,
    pub endpoint: String,
    pub action: Action,
    pub rule_ids: Vec<String>,
    pub text_excerpt: String,
    pub text_hash: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct BodyWithPrevious<'a> {
    #[serde(flatten)]
    draft: &'a AuditRecordDraft,
    previous_hash: &'a str,
}

/// Result of [`AuditChain::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub break_index: Option<usize>,
    pub count: usize,
}

/// A simple query filter over audit records (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub date_prefix: Option<String>,
    pub action: Option<Action>,
    pub rule_id: Option<String>,
    pub request_id: Option<String>,
}

impl QueryFilter {
    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(prefix) = &self.date_prefix {
            if !record.timestamp.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if let Some(rule_id) = &self.rule_id {
            if !record.rule_ids.iter().any(|r| r == rule_id) {
                return false;
            }
        }
        if let Some(request_id) = &self.request_id {
            if &record.request_id != request_id {
                return false;
            }
        }
        true
    }
}

struct WriterState {
    file: std::fs::File,
    tip_hash: String,
}

/// A single-writer, hash-chained append-only log. Exactly one [`AuditChain`]
/// should hold the writer for a given file (spec §4.3: "one writer process in
/// the core's model").
pub struct AuditChain {
    path: PathBuf,
    writer: Mutex<WriterState>,
}

impl AuditChain {
    /// Opens (creating if needed) the log at `path`, computing the current
    /// tip hash from the last well-formed line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JiminiError> {
        let path = path.as_ref().to_path_buf();
        let tip_hash = Self::tip_hash_from_file(&path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| JiminiError::Internal(format!("open audit log: {e}")))?;
        Ok(Self {
            path,
            writer: Mutex::new(WriterState { file, tip_hash }),
        })
    }

    fn tip_hash_from_file(path: &Path) -> Result<String, JiminiError> {
        if !path.exists() {
            return Ok(hex::encode(GENESIS_HASH));
        }
        let file = std::fs::File::open(path)
            .map_err(|e| JiminiError::Internal(format!("read audit log: {e}")))?;
        let reader = BufReader::new(file);
        let mut tip = hex::encode(GENESIS_HASH);
        for line in reader.lines() {
            let line = line.map_err(|e| JiminiError::Internal(format!("read line: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
                tip = record.chain_hash;
            }
            // A malformed trailing line is tolerated here (writer resumes from
            // the last well-formed record); `verify` is what flags corruption.
        }
        Ok(tip)
    }

    /// Appends `draft`, filling in `previous_hash`/`chain_hash`, durably
    /// flushing before returning, and advancing the in-memory tip hash. The
    /// call is serialized by an internal lock (spec §4.3/§5).
    pub fn append(&self, draft: AuditRecordDraft) -> Result<AuditRecord, JiminiError> {
        let mut state = self
            .writer
            .lock()
            .map_err(|_| JiminiError::Internal("audit writer lock poisoned".into()))?;

        let body = BodyWithPrevious {
            draft: &draft,
            previous_hash: &state.tip_hash,
        };
        let body_json = canonical(&body);
        let chain_hash = sha3_hex(body_json.as_bytes());

        let record = AuditRecord {
            timestamp: draft.timestamp,
            request_id: draft.request_id,
            agent_id: draft.agent_id,
            direction: draft.direction,
            endpoint: draft.endpoint,
            action: draft.action,
            rule_ids: draft.rule_ids,
            text_excerpt: draft.text_excerpt,
            text_hash: draft.text_hash,
            previous_hash: state.tip_hash.clone(),
            chain_hash: chain_hash.clone(),
            metadata: draft.metadata,
        };

        let line = canonical(&record);
        state
            .file
            .write_all(line.as_bytes())
            .and_then(|_| state.file.write_all(b"\n"))
            .and_then(|_| state.file.sync_all())
            .map_err(|e| JiminiError::Internal(format!("append audit record: {e}")))?;

        state.tip_hash = chain_hash;
        Ok(record)
    }

    /// Streams the log, recomputing each record's canonical serialization and
    /// validating `previous_hash` linkage and `chain_hash` equality. Stops at
    /// the first mismatch. Tolerates a trailing partial line.
    pub fn verify(&self) -> Result<VerifyOutcome, JiminiError> {
        if !self.path.exists() {
            return Ok(VerifyOutcome {
                valid: true,
                break_index: None,
                count: 0,
            });
        }
        let file = std::fs::File::open(&self.path)
            .map_err(|e| JiminiError::Internal(format!("read audit log: {e}")))?;
        let reader = BufReader::new(file);
        let lines: Vec<String> = reader
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| JiminiError::Internal(format!("read audit log: {e}")))?;

        let mut expected_previous = hex::encode(GENESIS_HASH);
        let mut count = 0usize;

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let is_last = index == lines.len() - 1;
            let record: AuditRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(_) if is_last => {
                    // trailing partial line: not yet committed
                    break;
                }
                Err(_) => {
                    return Ok(VerifyOutcome {
                        valid: false,
                        break_index: Some(index),
                        count,
                    });
                }
            };

            if record.previous_hash != expected_previous {
                return Ok(VerifyOutcome {
                    valid: false,
                    break_index: Some(index),
                    count,
                });
            }

            let draft = AuditRecordDraft {
                timestamp: record.timestamp.clone(),
                request_id: record.request_id.clone(),
                agent_id: record.agent_id.clone(),
                direction: record.direction,
                endpoint: record.endpoint.clone(),
                action: record.action,
                rule_ids: record.rule_ids.clone(),
                text_excerpt: record.text_excerpt.clone(),
                text_hash: record.text_hash.clone(),
                metadata: record.metadata.clone(),
            };
            let body = BodyWithPrevious {
                draft: &draft,
                previous_hash: &record.previous_hash,
            };
            let recomputed = sha3_hex(canonical(&body).as_bytes());
            if recomputed != record.chain_hash {
                return Ok(VerifyOutcome {
                    valid: false,
                    break_index: Some(index),
                    count,
                });
            }

            expected_previous = record.chain_hash.clone();
            count += 1;
        }

        Ok(VerifyOutcome {
            valid: true,
            break_index: None,
            count,
        })
    }

    /// Streams records matching `filter`.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<AuditRecord>, JiminiError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .map_err(|e| JiminiError::Internal(format!("read audit log: {e}")))?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| JiminiError::Internal(format!("read line: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
                if filter.matches(&record) {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }
}
