//! Jimini core: the policy decision pipeline behind the inline AI-policy gateway.
//!
//! Rules-as-data loading (C1), evaluation (C2), a hash-chained audit log
//! (C3), a resilience kit for outbound I/O (C4), a forwarder fan-out (C5),
//! in-process metrics and a SARIF export (C6), typed configuration (C7), and
//! the evaluation façade that ties them together (C8).

pub mod audit;
pub mod config;
pub mod engine;
pub mod errors;
pub mod facade;
pub mod forwarders;
pub mod hooks;
pub mod metrics;
pub mod resilience;
pub mod rules;

pub use engine::{evaluate, Decision, EvaluationRequest, ShadowMode};
pub use errors::JiminiError;
pub use facade::Facade;
pub use rules::{Action, Direction, Rule, RuleLoader, RuleSet};
