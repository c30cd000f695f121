//! Lifecycle event emission.
//!
//! The engine and deployment controller report run, stage and endpoint
//! transitions to an [`EventSink`]. Sinks observe; they never influence
//! execution.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by opsflow.
pub mod kinds {
    /// A run passed validation and was accepted.
    pub const RUN_SUBMITTED: &str = "run.submitted";
    /// A run started executing stages.
    pub const RUN_STARTED: &str = "run.started";
    /// Every stage succeeded or was skipped.
    pub const RUN_SUCCEEDED: &str = "run.succeeded";
    /// A stage failed terminally.
    pub const RUN_FAILED: &str = "run.failed";
    /// The run was cancelled.
    pub const RUN_CANCELLED: &str = "run.cancelled";
    /// A stage began its first attempt.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage wrote its output.
    pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
    /// A stage reused a previous output.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage exhausted its retry budget.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// An endpoint started serving a new artifact.
    pub const ENDPOINT_PUBLISHED: &str = "endpoint.published";
    /// An endpoint was removed.
    pub const ENDPOINT_RETIRED: &str = "endpoint.retired";
}
