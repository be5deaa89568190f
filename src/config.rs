//! Delegate configuration
//!
//! Loaded from a YAML file (every field has a default), then overridden by
//! `DELEGATE_*` environment variables. The process entry point builds one
//! [`DelegateConfig`] and passes it down; nothing reads settings globally.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trust::TrustTier;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegateConfig {
    /// Identifier stamped on every plan as `delegate_id`
    pub instance_id: String,
    pub default_tenant_id: String,
    pub planning: PlanningConfig,
    pub trust: TrustConfig,
    pub receipts: ReceiptConfig,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            instance_id: "delegate-1".to_string(),
            default_tenant_id: "default".to_string(),
            planning: PlanningConfig::default(),
            trust: TrustConfig::default(),
            receipts: ReceiptConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Ceiling on steps per plan, 1..=100
    pub max_plan_steps: usize,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self { max_plan_steps: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Minimum tier used when a request does not name one
    pub default_trust_tier: TrustTier,
    pub allow_untrusted_workers: bool,
    /// Clamp unsigned verified/trusted workers to sandbox
    pub require_signatures_production: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            default_trust_tier: TrustTier::Verified,
            allow_untrusted_workers: false,
            require_signatures_production: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    /// Immediate delivery attempts per receipt
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
    pub retry_queue_capacity: usize,
    /// Times a queued receipt is retried before it is dropped
    pub max_requeues: u32,
    pub retry_interval_secs: u64,
    /// Queued receipts retried per interval
    pub requeue_batch: usize,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            jitter: true,
            retry_queue_capacity: 1000,
            max_requeues: 10,
            retry_interval_secs: 60,
            requeue_batch: 10,
        }
    }
}

impl ReceiptConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl DelegateConfig {
    /// Load configuration for the process.
    ///
    /// Reads `path` if given, applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Self::default(),
        };
        config
            .apply_overrides(|key| std::env::var(key).ok())
            .context("invalid DELEGATE_* environment override")?;
        config.validate().context("configuration rejected")?;
        Ok(config)
    }

    /// Apply `DELEGATE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DELEGATE_INSTANCE_ID") {
            self.instance_id = value;
        }
        if let Some(value) = lookup("DELEGATE_DEFAULT_TENANT_ID") {
            self.default_tenant_id = value;
        }
        if let Some(value) = lookup("DELEGATE_MAX_PLAN_STEPS") {
            self.planning.max_plan_steps = value
                .trim()
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid(format!(
                        "DELEGATE_MAX_PLAN_STEPS: '{value}' is not a number"
                    ))
                })?;
        }
        if let Some(value) = lookup("DELEGATE_DEFAULT_TRUST_TIER") {
            self.trust.default_trust_tier = value
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("DELEGATE_DEFAULT_TRUST_TIER: {e}")))?;
        }
        if let Some(value) = lookup("DELEGATE_ALLOW_UNTRUSTED_WORKERS") {
            self.trust.allow_untrusted_workers =
                parse_bool("DELEGATE_ALLOW_UNTRUSTED_WORKERS", &value)?;
        }
        if let Some(value) = lookup("DELEGATE_REQUIRE_SIGNATURES_PRODUCTION") {
            self.trust.require_signatures_production =
                parse_bool("DELEGATE_REQUIRE_SIGNATURES_PRODUCTION", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::Invalid("instance_id must not be empty".to_string()));
        }
        if !(1..=100).contains(&self.planning.max_plan_steps) {
            return Err(ConfigError::Invalid(
                "planning.max_plan_steps must be between 1 and 100".to_string(),
            ));
        }
        if self.receipts.max_attempts == 0 {
            return Err(ConfigError::Invalid("receipts.max_attempts must be > 0".to_string()));
        }
        if self.receipts.retry_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "receipts.retry_queue_capacity must be > 0".to_string(),
            ));
        }
        if self.receipts.retry_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "receipts.retry_interval_secs must be > 0".to_string(),
            ));
        }
        if self.receipts.initial_backoff_ms > self.receipts.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "receipts.initial_backoff_ms must not exceed receipts.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse and validate a YAML config file.
pub fn load_config(path: &Path) -> Result<DelegateConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: DelegateConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!("{key}: '{other}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DelegateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.planning.max_plan_steps, 20);
        assert_eq!(config.trust.default_trust_tier, TrustTier::Verified);
        assert!(!config.trust.allow_untrusted_workers);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = "instance_id: delegate-eu\n\
                    trust:\n  allow_untrusted_workers: true\n\
                    receipts:\n  max_attempts: 5";
        writeln!(file, "{yaml}").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.instance_id, "delegate-eu");
        assert!(config.trust.allow_untrusted_workers);
        assert_eq!(config.receipts.max_attempts, 5);
        assert_eq!(config.receipts.retry_queue_capacity, 1000);
        assert_eq!(config.planning.max_plan_steps, 20);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "planning:\n  max_plan_steps: 0").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Invalid(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "planning: [not, a, map]").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = DelegateConfig::load(Some(Path::new("/nonexistent/delegate.yaml"))).unwrap_err();
        assert!(err.to_string().contains("failed to load config"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DELEGATE_INSTANCE_ID", "delegate-7"),
            ("DELEGATE_MAX_PLAN_STEPS", "50"),
            ("DELEGATE_DEFAULT_TRUST_TIER", "sandbox"),
            ("DELEGATE_REQUIRE_SIGNATURES_PRODUCTION", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = DelegateConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.instance_id, "delegate-7");
        assert_eq!(config.planning.max_plan_steps, 50);
        assert_eq!(config.trust.default_trust_tier, TrustTier::Sandbox);
        assert!(config.trust.require_signatures_production);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = DelegateConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "DELEGATE_ALLOW_UNTRUSTED_WORKERS").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
