//! `tracing-subscriber` installation.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::errors::{OpsflowError, Result};

/// Builds an env filter from a directive string such as `"info"` or
/// `"opsflow=debug,warn"`.
pub fn build_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| OpsflowError::Internal(format!("invalid log filter '{directives}': {e}")))
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    installed.map_err(|e| OpsflowError::Internal(format!("failed to install tracing subscriber: {e}")))
}
