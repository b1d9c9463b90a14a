//! `jimini`: thin CLI wrapper over `jimini-core`, standing in for the
//! out-of-scope HTTP transport (spec §1/§10 of SPEC_FULL.md).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jimini_core::audit::{AuditChain, QueryFilter};
use jimini_core::config::{AppSettings, ForwarderConfig};
use jimini_core::forwarders::elastic::ElasticSink;
use jimini_core::forwarders::file::JsonlFileSink;
use jimini_core::forwarders::hec::HecSink;
use jimini_core::forwarders::webhook::WebhookSink;
use jimini_core::forwarders::{Forwarder, Sink};
use jimini_core::metrics::sarif::build_sarif;
use jimini_core::resilience::{BreakerConfig, CircuitBreaker, DeadLetterQueue, RetryPolicy};
use jimini_core::rules::{Action, Direction as RuleDirection, RuleLoader};
use jimini_core::{Decision, EvaluationRequest, Facade, ShadowMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: u8 = 0;
const EXIT_UNHANDLED: u8 = 1;
const EXIT_CONFIG_INVALID: u8 = 2;
const EXIT_RULE_LOAD_FAILED: u8 = 3;
const EXIT_AUDIT_INVALID: u8 = 4;

/// Bound on each forwarder's in-memory queue (spec §4.5: bounded, drop-oldest).
const FORWARDER_QUEUE_CAPACITY: usize = 1024;
const FORWARDER_BATCH_SIZE: usize = 50;

#[derive(Parser)]
#[command(name = "jimini", version, about = "Inline AI-policy gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliDirection {
    Inbound,
    Outbound,
}

impl From<CliDirection> for RuleDirection {
    fn from(d: CliDirection) -> Self {
        match d {
            CliDirection::Inbound => RuleDirection::Inbound,
            CliDirection::Outbound => RuleDirection::Outbound,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate one request against a rule file and print the decision.
    Evaluate {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        audit: PathBuf,
        /// YAML settings file (`app`/`security`/`notifiers.*`/`siem.*`/`otel`/
        /// `breaker`/`retry` sections). CLI flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        text: String,
        #[arg(long, value_enum, default_value_t = CliDirection::Outbound)]
        direction: CliDirection,
        #[arg(long, default_value = "/")]
        endpoint: String,
        #[arg(long, default_value = "cli-agent")]
        agent_id: String,
        #[arg(long)]
        request_id: Option<String>,
        #[arg(long, env = "JIMINI_API_KEY")]
        api_key: Option<String>,
        #[arg(long)]
        shadow_mode: bool,
        #[arg(long, default_value_t = 5)]
        deadline_secs: u64,
    },
    /// Validate a rule file without installing it.
    Lint {
        #[arg(long)]
        rules: PathBuf,
    },
    /// Check the integrity of an audit chain.
    Verify {
        #[arg(long)]
        audit: PathBuf,
    },
    /// Export a day's block/flag decisions as a SARIF 2.1.0 document.
    Sarif {
        #[arg(long)]
        audit: PathBuf,
        /// Date prefix, e.g. `2026-07-31`.
        #[arg(long)]
        date: String,
    },
    /// Read-only status probe: never exposes secrets.
    Health {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        shadow_mode: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_UNHANDLED)
        }
    }
}

fn run(command: Command) -> Result<u8> {
    match command {
        Command::Evaluate {
            rules,
            audit,
            config,
            text,
            direction,
            endpoint,
            agent_id,
            request_id,
            api_key,
            shadow_mode,
            deadline_secs,
        } => evaluate(
            &rules,
            &audit,
            config.as_deref(),
            &text,
            direction.into(),
            &endpoint,
            &agent_id,
            request_id,
            api_key,
            shadow_mode,
            Duration::from_secs(deadline_secs),
        ),
        Command::Lint { rules } => lint(&rules),
        Command::Verify { audit } => verify(&audit),
        Command::Sarif { audit, date } => sarif(&audit, &date),
        Command::Health { rules, config, shadow_mode } => health(&rules, config.as_deref(), shadow_mode),
    }
}

fn load_settings(config_path: Option<&std::path::Path>) -> Result<AppSettings> {
    match config_path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file '{}'", path.display()))?;
            AppSettings::load(Some(&source)).context("invalid configuration")
        }
        None => AppSettings::load(None).context("invalid configuration"),
    }
}

type Forwarders = (Vec<Arc<Forwarder>>, Option<Arc<Forwarder>>);

/// Builds one [`Forwarder`] per configured notifier/SIEM target, and splits
/// off a single dedicated alert webhook if one is configured (spec §4.5/§4.8:
/// webhooks alert on `block`/`flag` only, other sinks fan out unconditionally).
fn build_forwarders(settings: &AppSettings) -> Result<Forwarders> {
    let breaker_config: BreakerConfig = (&settings.breaker).into();
    let retry_policy: RetryPolicy = (&settings.retry).into();

    let mut forwarders = Vec::new();
    let mut webhook = None;

    for (name, forwarder_config) in settings.notifiers.iter().chain(settings.siem.iter()) {
        let sink: Arc<dyn Sink> = match forwarder_config {
            ForwarderConfig::JsonlFile { path } => Arc::new(
                JsonlFileSink::open(name.clone(), path.clone())
                    .with_context(|| format!("opening jsonl forwarder '{name}'"))?,
            ),
            ForwarderConfig::Hec { endpoint, token } => {
                Arc::new(HecSink::new(name.clone(), endpoint.clone(), token.reveal().to_string()))
            }
            ForwarderConfig::Elastic { bulk_endpoint, index } => {
                Arc::new(ElasticSink::new(name.clone(), bulk_endpoint.clone(), index.clone()))
            }
            ForwarderConfig::Webhook { url } => {
                let forwarder = Arc::new(Forwarder::new(
                    Arc::new(WebhookSink::new(name.clone(), url.reveal().to_string())),
                    FORWARDER_QUEUE_CAPACITY,
                    FORWARDER_BATCH_SIZE,
                    Arc::new(CircuitBreaker::new(breaker_config)),
                    retry_policy,
                    Arc::new(DeadLetterQueue::new()),
                ));
                webhook = Some(forwarder);
                continue;
            }
        };
        forwarders.push(Arc::new(Forwarder::new(
            sink,
            FORWARDER_QUEUE_CAPACITY,
            FORWARDER_BATCH_SIZE,
            Arc::new(CircuitBreaker::new(breaker_config)),
            retry_policy,
            Arc::new(DeadLetterQueue::new()),
        )));
    }

    Ok((forwarders, webhook))
}

#[allow(clippy::too_many_arguments)]
fn evaluate(
    rules_path: &PathBuf,
    audit_path: &PathBuf,
    config_path: Option<&std::path::Path>,
    text: &str,
    direction: RuleDirection,
    endpoint: &str,
    agent_id: &str,
    request_id: Option<String>,
    api_key: Option<String>,
    shadow_mode: bool,
    deadline: Duration,
) -> Result<u8> {
    let settings = load_settings(config_path)?;

    let loader = Arc::new(RuleLoader::new());
    let source = std::fs::read_to_string(rules_path)
        .with_context(|| format!("reading rule file '{}'", rules_path.display()))?;
    if let Err(e) = loader.load(&source) {
        eprintln!("rule load failed: {e}");
        return Ok(EXIT_RULE_LOAD_FAILED);
    }

    let (forwarders, webhook) = build_forwarders(&settings)?;

    let audit = Arc::new(AuditChain::open(audit_path).context("opening audit chain")?);
    let metrics = Arc::new(jimini_core::metrics::Metrics::new());
    let effective_api_key = api_key.clone().or_else(|| settings.security.api_key.as_ref().map(|m| m.reveal().to_string()));
    let facade = Facade::new(
        loader,
        audit,
        metrics,
        forwarders.clone(),
        webhook.clone(),
        ShadowMode(shadow_mode || settings.app.shadow_mode),
        effective_api_key,
        None,
        None,
        None,
    );

    let request = EvaluationRequest {
        text: text.to_string(),
        direction,
        endpoint: endpoint.to_string(),
        agent_id: agent_id.to_string(),
        request_id: request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };
    let credential = api_key.unwrap_or_default();

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let decision: Decision = runtime
        .block_on(facade.evaluate(request, &credential, deadline))
        .context("evaluation failed")?;

    // One-shot CLI invocation: flush each forwarder's queue immediately
    // rather than waiting for the periodic background flush a long-running
    // server would use.
    runtime.block_on(async {
        for forwarder in &forwarders {
            forwarder.flush_once().await;
        }
        if let Some(webhook) = &webhook {
            webhook.flush_once().await;
        }
    });

    println!("{}", serde_json::to_string_pretty(&DecisionView::from(&decision))?);
    Ok(EXIT_OK)
}

#[derive(serde::Serialize)]
struct DecisionView {
    action: Action,
    rule_ids: Vec<String>,
    shadow_applied: bool,
    enforced_action: Action,
}

impl From<&Decision> for DecisionView {
    fn from(d: &Decision) -> Self {
        Self {
            action: d.action,
            rule_ids: d.rule_ids.clone(),
            shadow_applied: d.shadow_applied,
            enforced_action: d.enforced_action,
        }
    }
}

fn lint(rules_path: &PathBuf) -> Result<u8> {
    let source = std::fs::read_to_string(rules_path)
        .with_context(|| format!("reading rule file '{}'", rules_path.display()))?;
    match RuleLoader::lint(&source) {
        Ok(set) => {
            println!("ok: {} rule(s) valid", set.rules().len());
            Ok(EXIT_OK)
        }
        Err(e) => {
            eprintln!("rule load failed: {e}");
            Ok(EXIT_RULE_LOAD_FAILED)
        }
    }
}

fn verify(audit_path: &PathBuf) -> Result<u8> {
    let chain = AuditChain::open(audit_path).context("opening audit chain")?;
    let outcome = chain.verify().context("verifying audit chain")?;
    println!("{}", serde_json::json!({
        "valid": outcome.valid,
        "break_index": outcome.break_index,
        "count": outcome.count,
    }));
    if outcome.valid {
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_AUDIT_INVALID)
    }
}

fn sarif(audit_path: &PathBuf, date_prefix: &str) -> Result<u8> {
    let chain = AuditChain::open(audit_path).context("opening audit chain")?;
    let records = chain
        .query(&QueryFilter {
            date_prefix: Some(date_prefix.to_string()),
            ..Default::default()
        })
        .context("querying audit chain")?;
    let document = build_sarif(date_prefix, &records);
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(EXIT_OK)
}

fn health(rules_path: &PathBuf, config_path: Option<&std::path::Path>, shadow_mode: bool) -> Result<u8> {
    let settings = match load_settings(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("status: degraded (config invalid): {e:#}");
            return Ok(EXIT_CONFIG_INVALID);
        }
    };

    let source = std::fs::read_to_string(rules_path)
        .with_context(|| format!("reading rule file '{}'", rules_path.display()))?;
    let loaded_rules = match RuleLoader::lint(&source) {
        Ok(set) => set.rules().len(),
        Err(_) => {
            eprintln!("status: degraded (rule file invalid)");
            return Ok(EXIT_CONFIG_INVALID);
        }
    };
    println!(
        "{}",
        serde_json::json!({
            "status": "ok",
            "shadow_mode": shadow_mode || settings.app.shadow_mode,
            "loaded_rules": loaded_rules,
            "version": env!("CARGO_PKG_VERSION"),
        })
    );
    Ok(EXIT_OK)
}
