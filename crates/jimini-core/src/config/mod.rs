//! Configuration & secret loader (C7): typed config, file+env merge, secret masking.

pub mod secrets;

use crate::errors::JiminiError;
use crate::resilience::{BreakerConfig, RetryPolicy};
use secrets::Masked;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// `app` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub shadow_mode: bool,
    #[serde(default)]
    pub rules_path: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// `security` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<Masked>,
}

/// One configured forwarder under `notifiers.*`/`siem.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForwarderConfig {
    JsonlFile { path: String },
    Hec { endpoint: String, token: Masked },
    Elastic { bulk_endpoint: String, index: String },
    Webhook { url: Masked },
}

/// `otel` section (pass-through; the core does not interpret it beyond
/// presence, per spec §1's exclusion of a separate observability layer as a
/// non-goal — the section is still carried per spec §9's "ambient stack" note).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OtelConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Top-level application configuration (spec §4.7/§6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub notifiers: HashMap<String, ForwarderConfig>,
    #[serde(default)]
    pub siem: HashMap<String, ForwarderConfig>,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default = "default_breaker_config")]
    pub breaker: BreakerSettings,
    #[serde(default = "default_retry_config")]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_probe_limit")]
    pub half_open_probe_limit: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    30
}
fn default_half_open_probe_limit() -> u32 {
    1
}
fn default_breaker_config() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: default_failure_threshold(),
        recovery_timeout_secs: default_recovery_timeout_secs(),
        half_open_probe_limit: default_half_open_probe_limit(),
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        default_breaker_config()
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        BreakerConfig {
            failure_threshold: s.failure_threshold,
            recovery_timeout: Duration::from_secs(s.recovery_timeout_secs),
            half_open_probe_limit: s.half_open_probe_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_retry_config() -> RetrySettings {
    RetrySettings {
        max_attempts: default_max_attempts(),
        base_delay_ms: default_base_delay_ms(),
        max_delay_ms: default_max_delay_ms(),
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        default_retry_config()
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: s.max_attempts,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
        }
    }
}

impl AppSettings {
    /// Parses `yaml_source` (if given), then overlays environment variables
    /// (`JIMINI_SHADOW_MODE`, `JIMINI_API_KEY`, `JIMINI_RULES_PATH`), env
    /// winning over the file (spec §4.7).
    pub fn load(yaml_source: Option<&str>) -> Result<Self, JiminiError> {
        let mut settings: AppSettings = match yaml_source {
            Some(src) => serde_yaml::from_str(src)
                .map_err(|e| JiminiError::Internal(format!("config parse error: {e}")))?,
            None => AppSettings::default(),
        };

        if let Ok(v) = std::env::var("JIMINI_SHADOW_MODE") {
            settings.app.shadow_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("JIMINI_RULES_PATH") {
            settings.app.rules_path = Some(v);
        }
        if let Ok(v) = std::env::var("JIMINI_API_KEY") {
            settings.security.api_key = Some(Masked::new(v));
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Fails fast on invalid configuration (spec §4.7):
    /// missing API key when authorization is enabled; rule path that does
    /// not exist; an unknown forwarder type or malformed URL.
    fn validate(&self) -> Result<(), JiminiError> {
        if self.security.enabled && self.security.api_key.is_none() {
            return Err(JiminiError::Internal(
                "security.enabled is true but no api_key is configured".into(),
            ));
        }

        if let Some(path) = &self.app.rules_path {
            if !std::path::Path::new(path).exists() {
                return Err(JiminiError::Internal(format!(
                    "rules_path '{path}' does not exist"
                )));
            }
        }

        for (name, forwarder) in self.notifiers.iter().chain(self.siem.iter()) {
            match forwarder {
                ForwarderConfig::Hec { endpoint, .. } | ForwarderConfig::Elastic { bulk_endpoint: endpoint, .. } => {
                    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                        return Err(JiminiError::Internal(format!(
                            "forwarder '{name}' has a malformed endpoint URL: {endpoint}"
                        )));
                    }
                }
                ForwarderConfig::Webhook { url } => {
                    let u = url.reveal();
                    if !(u.starts_with("http://") || u.starts_with("https://")) {
                        return Err(JiminiError::Internal(format!(
                            "forwarder '{name}' has a malformed webhook URL"
                        )));
                    }
                }
                ForwarderConfig::JsonlFile { .. } => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        std::env::remove_var("JIMINI_SHADOW_MODE");
        std::env::remove_var("JIMINI_RULES_PATH");
        std::env::remove_var("JIMINI_API_KEY");
    }

    #[test]
    fn defaults_are_safe_when_no_source_given() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let settings = AppSettings::load(None).unwrap();
        assert!(!settings.app.shadow_mode);
        assert!(!settings.security.enabled);
    }

    #[test]
    fn env_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("JIMINI_SHADOW_MODE", "true");
        let settings = AppSettings::load(Some("app:\n  shadow_mode: false\n")).unwrap();
        assert!(settings.app.shadow_mode);
        clear_env();
    }

    #[test]
    fn fails_fast_when_security_enabled_without_api_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = AppSettings::load(Some("security:\n  enabled: true\n"));
        assert!(result.is_err());
    }

    #[test]
    fn fails_fast_on_missing_rules_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = AppSettings::load(Some("app:\n  rules_path: /no/such/file.yaml\n"));
        assert!(result.is_err());
    }

    #[test]
    fn fails_fast_on_malformed_forwarder_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let src = "notifiers:\n  alerts:\n    type: webhook\n    url: not-a-url\n";
        let result = AppSettings::load(Some(src));
        assert!(result.is_err());
    }

    #[test]
    fn accepts_well_formed_hec_forwarder() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let src = "siem:\n  splunk:\n    type: hec\n    endpoint: https://splunk.example.com/services/collector\n    token: abc123\n";
        assert!(AppSettings::load(Some(src)).is_ok());
    }
}
