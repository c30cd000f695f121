//! Status enums for runs, stages and endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a pipeline run.
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled}`; a pending run may
/// also be cancelled before it starts. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Submitted, not yet started.
    #[default]
    Pending,
    /// Executing stages.
    Running,
    /// All stages succeeded or were skipped.
    Succeeded,
    /// A stage failed terminally.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl RunStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started.
    #[default]
    Pending,
    /// Executing.
    Running,
    /// Produced its output artifact.
    Succeeded,
    /// Reused the output of a previous attempt of the same run.
    Skipped,
    /// Exhausted its retry budget.
    Failed,
    /// Not executed because the run was cancelled.
    Cancelled,
}

impl StageStatus {
    /// Returns true if the stage's output is available to later stages.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of a deployed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    /// No endpoint exists under the name.
    #[default]
    Absent,
    /// Serving.
    Active,
    /// Replaced and being torn down.
    Retiring,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Active => write!(f, "active"),
            Self::Retiring => write!(f, "retiring"),
        }
    }
}
