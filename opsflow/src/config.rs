//! Explicit configuration passed to each component's constructor.
//!
//! Nothing is read from ambient global state; callers load an
//! [`OpsflowConfig`] (from JSON, a file, or defaults), optionally apply
//! environment overrides, and hand the relevant section to each component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{OpsflowError, Result};
use crate::monitor::DEFAULT_HISTORY_LIMIT;
use crate::pipeline::BackoffPolicy;

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "OPSFLOW_LOG_LEVEL";
/// Environment variable enabling JSON logs (`1`/`true`).
pub const ENV_LOG_JSON: &str = "OPSFLOW_LOG_JSON";
/// Environment variable overriding the state directory.
pub const ENV_STATE_DIR: &str = "OPSFLOW_STATE_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsflowConfig {
    /// Logging setup.
    pub logging: LoggingConfig,
    /// Stage executor defaults.
    pub executor: ExecutorConfig,
    /// Deployment controller settings.
    pub deployment: DeploymentConfig,
    /// Monitor settings.
    pub monitor: MonitorConfig,
    /// Directory for durable artifacts and run state; in-memory when unset.
    pub state_dir: Option<PathBuf>,
}

impl OpsflowConfig {
    /// Parses configuration from a JSON string. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw).map_err(|e| match e {
            OpsflowError::Serialization(msg) => {
                OpsflowError::Serialization(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Applies `OPSFLOW_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(json) = lookup(ENV_LOG_JSON) {
            self.logging.json = matches!(json.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "opsflow=debug").
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Stage executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Delay policy between failed attempts.
    pub backoff: BackoffPolicy,
}

/// Deployment controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Total provisioning attempts per publish.
    pub provision_attempts: u32,
    /// Timeout for one provisioning attempt, in milliseconds.
    pub provision_timeout_ms: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            provision_attempts: 3,
            provision_timeout_ms: 60_000,
        }
    }
}

impl DeploymentConfig {
    /// Returns the provisioning timeout.
    #[must_use]
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Values retained per metric name.
    pub history_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}
