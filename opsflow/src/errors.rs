//! Error types for opsflow.
//!
//! Errors are split structurally into recoverable conditions the caller can
//! act on (a missing artifact or endpoint) and fatal conditions that end a
//! read, a run, or a deployment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Convenience result alias.
pub type Result<T, E = OpsflowError> = std::result::Result<T, E>;

/// The main error type for opsflow operations.
#[derive(Debug, Error)]
pub enum OpsflowError {
    /// A requested artifact, version, run or endpoint does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored artifact's content no longer matches its recorded hash.
    #[error("Corrupt artifact '{key}' v{version}: expected hash {expected}, found {actual}")]
    CorruptArtifact {
        /// Artifact key.
        key: String,
        /// Artifact version.
        version: u64,
        /// Hash recorded at write time.
        expected: String,
        /// Hash recomputed at read time.
        actual: String,
    },

    /// A stage exhausted its retry budget.
    #[error("Stage '{stage}' failed after {attempts} attempt(s): {last_error}")]
    StageFailed {
        /// Stage name.
        stage: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// A run specification failed static validation.
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(#[from] PipelineValidationError),

    /// Endpoint provisioning or decommissioning failed.
    #[error("Deployment of endpoint '{endpoint}' failed: {reason}")]
    DeploymentFailed {
        /// Endpoint name.
        endpoint: String,
        /// Failure reason.
        reason: String,
    },

    /// An alarm definition was rejected.
    #[error("Invalid alarm: {0}")]
    InvalidAlarm(String),

    /// Execution stopped because the run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// A run with this id is still executing.
    #[error("Run '{0}' is already in progress")]
    RunInProgress(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsflowError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a deployment failure.
    #[must_use]
    pub fn deployment_failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeploymentFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the caller can reasonably recover from this error.
    ///
    /// Only missing resources are recoverable; everything else is fatal for
    /// the operation that produced it.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns a stable machine-readable kind for this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::CorruptArtifact { .. } => "corrupt_artifact",
            Self::StageFailed { .. } => "stage_failed",
            Self::InvalidPipeline(_) => "invalid_pipeline",
            Self::DeploymentFailed { .. } => "deployment_failed",
            Self::InvalidAlarm(_) => "invalid_alarm",
            Self::Cancelled(_) => "cancelled",
            Self::RunInProgress(_) => "run_in_progress",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for OpsflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-UNKNOWN-INPUT").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a run specification fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if one was attached.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "train");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"train".to_string()));
    }

    #[test]
    fn test_validation_error_code() {
        let err = PipelineValidationError::new("bad")
            .with_stages(vec!["train".to_string()])
            .with_error_info(ContractErrorInfo::new("PIPELINE-EMPTY", "empty"));

        assert_eq!(err.code(), Some("PIPELINE-EMPTY"));
        assert_eq!(err.stages, vec!["train".to_string()]);
    }

    #[test]
    fn test_stage_failed_display() {
        let err = OpsflowError::StageFailed {
            stage: "train".to_string(),
            attempts: 3,
            last_error: "out of memory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stage 'train' failed after 3 attempt(s): out of memory"
        );
        assert_eq!(err.kind(), "stage_failed");
    }

    #[test]
    fn test_recoverable_split() {
        assert!(OpsflowError::not_found("x").is_recoverable());
        assert!(!OpsflowError::deployment_failed("ep", "boom").is_recoverable());
        assert!(!OpsflowError::InvalidPipeline(PipelineValidationError::new("x")).is_recoverable());
    }

    #[test]
    fn test_from_serde_json() {
        let err: OpsflowError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), "serialization");
    }
}
