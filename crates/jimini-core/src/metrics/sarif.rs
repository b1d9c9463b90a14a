//! SARIF export: projects a day's audit records as SARIF 2.1.0 results (spec §4.6/§6).

use crate::audit::AuditRecord;
use crate::rules::Action;

/// Schema URI shared by every SARIF document this crate produces, following
/// the teacher's convention of a single named constant for the schema
/// reference.
pub const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json";

const TOOL_NAME: &str = "Jimini";

fn is_eligible(action: Action) -> bool {
    matches!(action, Action::Block | Action::Flag)
}

fn level_for(action: Action) -> &'static str {
    match action {
        Action::Block => "error",
        Action::Flag => "warning",
        Action::Allow => "note",
    }
}

/// Builds a single SARIF run from the records whose `timestamp` begins with
/// `date_prefix` (e.g. `"2026-07-31"`), projecting each `block`/`flag`
/// decision as a result (spec §4.6).
pub fn build_sarif(date_prefix: &str, records: &[AuditRecord]) -> serde_json::Value {
    let results: Vec<serde_json::Value> = records
        .iter()
        .filter(|r| r.timestamp.starts_with(date_prefix) && is_eligible(r.action))
        .map(|r| {
            let rule_id = r.rule_ids.first().cloned().unwrap_or_default();
            serde_json::json!({
                "ruleId": rule_id,
                "level": level_for(r.action),
                "message": {
                    "text": format!(
                        "{} by {} for {}",
                        format!("{:?}", r.action).to_lowercase(),
                        rule_id,
                        r.agent_id
                    )
                },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": r.endpoint },
                        "region": { "startLine": 1, "startColumn": 1 }
                    }
                }],
                "properties": {
                    "request_id": r.request_id,
                    "direction": format!("{:?}", r.direction).to_lowercase(),
                }
            })
        })
        .collect();

    serde_json::json!({
        "version": "2.1.0",
        "$schema": SARIF_SCHEMA,
        "runs": [{
            "tool": { "driver": { "name": TOOL_NAME } },
            "results": results
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Direction;
    use std::collections::BTreeMap;

    fn record(date: &str, action: Action, rule_ids: &[&str]) -> AuditRecord {
        AuditRecord {
            timestamp: format!("{date}T00:00:00.000Z"),
            request_id: "r1".to_string(),
            agent_id: "agent-1".to_string(),
            direction: Direction::Outbound,
            endpoint: "/e".to_string(),
            action,
            rule_ids: rule_ids.iter().map(|s| s.to_string()).collect(),
            text_excerpt: "x".to_string(),
            text_hash: "h".to_string(),
            previous_hash: "0".repeat(64),
            chain_hash: "1".repeat(64),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn projects_block_and_flag_only() {
        let records = vec![
            record("2026-07-31", Action::Block, &["A"]),
            record("2026-07-31", Action::Flag, &["B"]),
            record("2026-07-31", Action::Allow, &[]),
        ];
        let sarif = build_sarif("2026-07-31", &records);
        let results = sarif["runs"][0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn filters_by_date_prefix() {
        let records = vec![
            record("2026-07-31", Action::Block, &["A"]),
            record("2026-08-01", Action::Block, &["A"]),
        ];
        let sarif = build_sarif("2026-07-31", &records);
        let results = sarif["runs"][0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn message_format_matches_spec() {
        let records = vec![record("2026-07-31", Action::Block, &["IL-AI-4.2"])];
        let sarif = build_sarif("2026-07-31", &records);
        let message = sarif["runs"][0]["results"][0]["message"]["text"].as_str().unwrap();
        assert_eq!(message, "block by IL-AI-4.2 for agent-1");
    }

    #[test]
    fn tool_driver_name_is_jimini() {
        let sarif = build_sarif("2026-07-31", &[]);
        assert_eq!(sarif["runs"][0]["tool"]["driver"]["name"], "Jimini");
        assert_eq!(sarif["version"], "2.1.0");
    }
}
