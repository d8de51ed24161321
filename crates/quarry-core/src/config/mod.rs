//! Configuration types for Quarry.
//!
//! Configuration is loaded from a YAML file (`quarry.yaml`) and, optionally, a
//! separate policy file referenced by `policy_file`.
//!
//! # Configuration Files
//!
//! - **quarry.yaml**: validation budgets, model registry, logging and an inline policy
//! - **policy.yaml**: mandatory conditions, per-relation status conditions and exclusions

pub mod ai;
pub mod policy;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use ai::{AiConfig, ModelConfig, ProviderKind};
pub use policy::{PolicyConfig, PolicyHandle, STATUS_PLACEHOLDER};

/// Complete Quarry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    /// Project name.
    #[serde(default)]
    pub project: Option<String>,

    /// Policy (inline or from file).
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Path to a policy file (overrides the inline policy when present).
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Model providers.
    #[serde(default)]
    pub ai: AiConfig,

    /// Validation loop budgets.
    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Budgets and shapes used by the validation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Timeout for one probe; a timeout escalates straight to the fallback.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// `TOP k` of the safe fallback query.
    #[serde(default = "default_fallback_row_limit")]
    pub fallback_row_limit: u32,

    /// How many known-good columns the fallback query projects.
    #[serde(default = "default_fallback_column_count")]
    pub fallback_column_count: usize,

    /// Cap inserted when a query sorts without a row limit.
    #[serde(default = "default_top_cap")]
    pub top_cap: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            fallback_row_limit: default_fallback_row_limit(),
            fallback_column_count: default_fallback_column_count(),
            top_cap: default_top_cap(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_fallback_row_limit() -> u32 {
    100
}

fn default_fallback_column_count() -> usize {
    5
}

fn default_top_cap() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QuarryConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration and resolve the external policy file.
    ///
    /// A relative `policy_file` is resolved against the config file's directory.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(policy_file) = &config.policy_file {
            let policy_path = if policy_file.is_absolute() {
                policy_file.clone()
            } else {
                base_dir.join(policy_file)
            };

            if !policy_path.exists() {
                return Err(ConfigError::Config(format!(
                    "Policy file not found: {}",
                    policy_path.display()
                )));
            }
            config.policy = PolicyConfig::from_file(&policy_path)?;
        }

        config.check()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.validation.probe_timeout_ms == 0 {
            return Err(ConfigError::Config(
                "validation.probe_timeout_ms must be positive".to_string(),
            ));
        }
        if self.validation.fallback_column_count == 0 || self.validation.fallback_row_limit == 0 {
            return Err(ConfigError::Config(
                "fallback row limit and column count must be positive".to_string(),
            ));
        }
        if let Some(default) = &self.ai.default_model {
            if self.ai.model(default).is_none() {
                return Err(ConfigError::Config(format!(
                    "ai.default_model '{}' is not in ai.models",
                    default
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = QuarryConfig::from_yaml("project: demo").unwrap();
        assert_eq!(config.project.as_deref(), Some("demo"));
        assert_eq!(config.validation.probe_timeout_ms, 5000);
        assert_eq!(config.validation.top_cap, 100);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.policy, PolicyConfig::default());
    }

    #[test]
    fn test_load_with_relative_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = fs::File::create(dir.path().join("policy.yaml")).unwrap();
        writeln!(policy, "mandatory_conditions: [\"CompanyId = 9\"]").unwrap();
        writeln!(policy, "tenant_column: CompanyId").unwrap();

        let config_path = dir.path().join("quarry.yaml");
        fs::write(
            &config_path,
            "policy_file: policy.yaml\nvalidation:\n  probe_timeout_ms: 250\n",
        )
        .unwrap();

        let config = QuarryConfig::load_with_context(&config_path).unwrap();
        assert_eq!(config.policy.mandatory_conditions, vec!["CompanyId = 9"]);
        assert_eq!(config.policy.tenant_column, "CompanyId");
        assert_eq!(config.validation.probe_timeout_ms, 250);
    }

    #[test]
    fn test_missing_policy_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("quarry.yaml");
        fs::write(&config_path, "policy_file: nope.yaml\n").unwrap();

        let err = QuarryConfig::load_with_context(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let config = QuarryConfig::from_yaml("ai:\n  default_model: gpt\n").unwrap();
        assert!(config.check().is_err());
    }
}
