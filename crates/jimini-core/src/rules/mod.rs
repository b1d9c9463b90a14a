//! Rule model and loader (C1): rules-as-data, compiled once at load, hot-swappable.

use crate::errors::JiminiError;
use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Decision action a rule, or a request, resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Flag,
    Block,
}

/// Direction a request flows in; `Unspecified` only ever appears on a request,
/// never on a rule's `applies_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    Unspecified,
}

/// Per-rule opt-out of global shadow mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowOverride {
    Enforce,
}

/// A single rule as parsed from YAML, before regex compilation.
///
/// Unknown keys are accepted and kept in `extras` for forward compatibility;
/// they never influence evaluation (spec §9, "dynamic typing of rule
/// documents").
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    pub id: String,
    pub action: Action,
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_count: Option<u32>,
    pub max_chars: Option<usize>,
    pub llm_prompt: Option<String>,
    #[serde(default)]
    pub applies_to: Vec<Direction>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub shadow_override: Option<ShadowOverride>,
    // cosmetic, never affect decisions
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extras: std::collections::BTreeMap<String, serde_json::Value>,
}

/// A rule compiled and validated: regex compiled once, endpoint matchers built.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub action: Action,
    pub pattern: Option<Regex>,
    pub min_count: u32,
    pub max_chars: Option<usize>,
    pub llm_prompt: Option<String>,
    pub applies_to: Vec<Direction>,
    pub endpoints: Vec<String>,
    pub shadow_override: Option<ShadowOverride>,
}

impl Rule {
    fn compile(def: RuleDef) -> Result<Self, JiminiError> {
        if def.pattern.is_none() && def.max_chars.is_none() && def.llm_prompt.is_none() {
            return Err(JiminiError::rule_load(
                &def.id,
                "pattern|max_chars|llm_prompt",
                "at least one of pattern, max_chars, llm_prompt must be present",
            ));
        }

        let min_count = def.min_count.unwrap_or(1);
        if min_count < 1 {
            return Err(JiminiError::rule_load(
                &def.id,
                "min_count",
                "min_count must be >= 1",
            ));
        }

        let pattern = match def.pattern {
            Some(p) => Some(Regex::new(&p).map_err(|e| {
                JiminiError::rule_load(&def.id, "pattern", format!("invalid regex: {e}"))
            })?),
            None => None,
        };

        Ok(Rule {
            id: def.id,
            action: def.action,
            pattern,
            min_count,
            max_chars: def.max_chars,
            llm_prompt: def.llm_prompt,
            applies_to: def.applies_to,
            endpoints: def.endpoints,
            shadow_override: def.shadow_override,
        })
    }

    /// Whether `direction` is admitted by `applies_to` (empty = any direction).
    pub fn admits_direction(&self, direction: Direction) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&direction)
    }

    /// Whether `endpoint` is admitted by `endpoints` (empty = any endpoint).
    ///
    /// A selector matches if it is exactly the endpoint, ends with `/*` and
    /// the endpoint begins with that prefix, or contains `*` and matches as a
    /// simple glob (spec §4.1).
    pub fn admits_endpoint(&self, endpoint: &str) -> bool {
        if self.endpoints.is_empty() {
            return true;
        }
        self.endpoints.iter().any(|selector| {
            if selector == endpoint {
                return true;
            }
            if let Some(prefix) = selector.strip_suffix("/*") {
                return endpoint.starts_with(prefix);
            }
            if selector.contains('*') {
                if let Ok(glob) = globset::Glob::new(selector) {
                    return glob.compile_matcher().is_match(endpoint);
                }
            }
            false
        })
    }
}

/// Top-level YAML document: `rules: [...]`.
#[derive(Debug, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    rules: Vec<RuleDef>,
}

/// An immutable, validated set of rules. Cheap to clone (wraps an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<Vec<Rule>>,
}

impl RuleSet {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn parse(source: &str) -> Result<Self, JiminiError> {
        let doc: RuleDocument = serde_yaml::from_str(source)
            .map_err(|e| JiminiError::rule_load("<document>", "yaml", e.to_string()))?;

        let mut seen = HashSet::with_capacity(doc.rules.len());
        let mut compiled = Vec::with_capacity(doc.rules.len());
        for def in doc.rules {
            if !seen.insert(def.id.clone()) {
                return Err(JiminiError::rule_load(&def.id, "id", "duplicate rule id"));
            }
            compiled.push(Rule::compile(def)?);
        }
        Ok(RuleSet {
            rules: Arc::new(compiled),
        })
    }
}

/// Holds the active [`RuleSet`] behind an atomic pointer, supporting
/// hot-reload without disrupting in-flight evaluations (spec §5: "evaluations
/// in flight continue with the snapshot they captured").
pub struct RuleLoader {
    active: ArcSwap<RuleSet>,
}

impl Default for RuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleLoader {
    pub fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(RuleSet::default()),
        }
    }

    /// Parses and validates `source`, swapping it in as the active set on
    /// success. The previous active set is retained on any error — loads are
    /// all-or-nothing (spec §4.1: "no partial loads").
    pub fn load(&self, source: &str) -> Result<(), JiminiError> {
        let parsed = RuleSet::parse(source)?;
        self.active.store(Arc::new(parsed));
        Ok(())
    }

    /// An immutable snapshot of the currently active rule set.
    pub fn active(&self) -> RuleSet {
        (**self.active.load()).clone()
    }

    /// Parses and validates `source` without installing it.
    pub fn lint(source: &str) -> Result<RuleSet, JiminiError> {
        RuleSet::parse(source)
    }
}
