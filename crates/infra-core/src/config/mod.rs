//! Configuration types for infra-agent.
//!
//! A single YAML file (`infra-agent.yaml` by default) is deserialized into
//! [`AgentConfig`]. Every section and field has a default, so an empty or
//! missing file yields a working in-memory agent.
//!
//! # Resolution order for the file path
//!
//! 1. an explicit path (CLI `--config`)
//! 2. the `INFRA_AGENT_CONFIG` environment variable
//! 3. `infra-agent.yaml` in the working directory

pub mod execution;
pub mod reporting;
pub mod server;
pub mod state;

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use execution::{ExecutorConfig, PlannerConfig, RetryConfig};
pub use reporting::{ReportSinkKind, ReportingConfig};
pub use server::{GrafanaWebhookConfig, ServerConfig, WebhooksConfig};
pub use state::{StateBackend, StateConfig};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "INFRA_AGENT_CONFIG";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "infra-agent.yaml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub reporting: ReportingConfig,

    #[serde(default)]
    pub webhooks: WebhooksConfig,
}

/// Logging configuration for the binaries' tracing subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Load configuration from a file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration following the documented resolution order.
    ///
    /// An explicit path must exist; the implicit default file may be absent,
    /// in which case defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        if let Ok(p) = env::var(CONFIG_ENV) {
            return Self::load_from_file(Path::new(&p));
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            return Self::load_from_file(default_path);
        }
        Ok(Self::default())
    }

    /// Reject settings the executor and planner cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.planner.max_nodes == 0 {
            return Err(ConfigError::Invalid(
                "planner.max_nodes must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.state.backend != StateBackend::Memory && self.state.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "state.path is required for durable backends".to_string(),
            ));
        }
        Ok(())
    }
}
