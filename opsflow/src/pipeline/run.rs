//! Persisted record of one pipeline run.

use serde::{Deserialize, Serialize};

use super::spec::RunSpec;
use crate::core::{ArtifactRef, RunStatus, StageStatus};
use crate::utils::iso_timestamp;

/// Progress of a single stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Output key the stage writes.
    pub output_key: String,
    /// Current status.
    pub status: StageStatus,
    /// Attempts used so far.
    pub attempts: u32,
    /// Output written (or reused) by the stage.
    pub output: Option<ArtifactRef>,
    /// Fingerprint of the input artifacts the output was computed from.
    pub input_fingerprint: Option<String>,
    /// Error from the final failed attempt.
    pub error: Option<String>,
    /// When the stage started.
    pub started_at: Option<String>,
    /// When the stage reached a final status.
    pub finished_at: Option<String>,
}

impl StageRecord {
    fn pending(name: &str, output_key: &str) -> Self {
        Self {
            name: name.to_string(),
            output_key: output_key.to_string(),
            status: StageStatus::Pending,
            attempts: 0,
            output: None,
            input_fingerprint: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Marks the stage as running.
    pub fn start(&mut self, fingerprint: String) {
        self.status = StageStatus::Running;
        self.input_fingerprint = Some(fingerprint);
        self.started_at = Some(iso_timestamp());
    }

    /// Marks the stage as succeeded with `output`.
    pub fn succeed(&mut self, output: ArtifactRef, attempts: u32) {
        self.status = StageStatus::Succeeded;
        self.output = Some(output);
        self.attempts = attempts;
        self.finished_at = Some(iso_timestamp());
    }

    /// Marks the stage as skipped, reusing a previous output.
    pub fn skip(&mut self, output: ArtifactRef, fingerprint: String) {
        let now = iso_timestamp();
        self.status = StageStatus::Skipped;
        self.output = Some(output);
        self.input_fingerprint = Some(fingerprint);
        self.started_at = Some(now.clone());
        self.finished_at = Some(now);
    }

    /// Marks the stage as failed.
    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) {
        self.status = StageStatus::Failed;
        self.error = Some(error.into());
        self.attempts = attempts;
        self.finished_at = Some(iso_timestamp());
    }

    /// Marks the stage as cancelled.
    pub fn cancel(&mut self) {
        self.status = StageStatus::Cancelled;
        self.finished_at = Some(iso_timestamp());
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The stage that failed.
    pub stage: String,
    /// The final error message.
    pub error: String,
    /// Attempts the stage used.
    pub attempts: u32,
}

/// A pipeline run and its per-stage progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub run_id: String,
    /// How many times this run id has been submitted (1-based).
    pub attempt: u32,
    /// Pipeline name, if the run specification carried one.
    pub pipeline: Option<String>,
    /// Current status.
    pub status: RunStatus,
    /// Stage progress in execution order.
    pub stages: Vec<StageRecord>,
    /// Set when the run failed.
    pub failure: Option<RunFailure>,
    /// Set when the run was cancelled.
    pub cancel_reason: Option<String>,
    /// When the run was submitted.
    pub submitted_at: String,
    /// When the run started executing.
    pub started_at: Option<String>,
    /// When the run reached a terminal status.
    pub finished_at: Option<String>,
}

impl PipelineRun {
    /// Creates a pending run for `spec`.
    #[must_use]
    pub fn new(run_id: impl Into<String>, spec: &RunSpec, attempt: u32) -> Self {
        Self {
            run_id: run_id.into(),
            attempt,
            pipeline: spec.name.clone(),
            status: RunStatus::Pending,
            stages: spec
                .stages
                .iter()
                .map(|s| StageRecord::pending(&s.name, &s.output))
                .collect(),
            failure: None,
            cancel_reason: None,
            submitted_at: iso_timestamp(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Moves the run to `next` if the transition is legal.
    ///
    /// Returns false and leaves the run untouched otherwise; in particular a
    /// terminal status never changes.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == RunStatus::Running {
            self.started_at = Some(iso_timestamp());
        }
        if next.is_terminal() {
            self.finished_at = Some(iso_timestamp());
        }
        true
    }

    /// Returns the record for `name`.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the mutable record for `name`.
    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Returns `(stage, status)` pairs in execution order.
    #[must_use]
    pub fn stage_statuses(&self) -> Vec<(String, StageStatus)> {
        self.stages
            .iter()
            .map(|s| (s.name.clone(), s.status))
            .collect()
    }

    /// Returns true once every stage succeeded or was skipped.
    #[must_use]
    pub fn all_stages_complete(&self) -> bool {
        self.stages.iter().all(|s| s.status.is_complete())
    }

    /// Returns the output of the last completed stage.
    #[must_use]
    pub fn final_output(&self) -> Option<&ArtifactRef> {
        self.stages
            .iter()
            .rev()
            .filter(|s| s.status.is_complete())
            .find_map(|s| s.output.as_ref())
    }

    /// Returns the output written for `key`, if a completed stage wrote it.
    #[must_use]
    pub fn output_for(&self, key: &str) -> Option<&ArtifactRef> {
        self.stages
            .iter()
            .filter(|s| s.status.is_complete())
            .filter_map(|s| s.output.as_ref())
            .find(|r| r.key == key)
    }
}
