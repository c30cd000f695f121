//! Pipeline specification and execution.
//!
//! This module provides:
//! - Stage and run specifications with static validation
//! - The stage executor (retry, timeout, per-attempt metrics)
//! - The pipeline engine (ordered execution, persistence, resume, cancel)
//! - Backoff policy shared with the deployment controller

mod engine;
mod executor;
mod retry;
mod run;
mod spec;
mod state;


pub use engine::{EngineBuilder, PipelineEngine};
pub use executor::{AttemptOutcome, ExecutionReport, StageExecutor};
pub use retry::{with_retry, BackoffPolicy, BackoffStrategy, JitterStrategy, RetryExhausted};
pub use run::{PipelineRun, RunFailure, StageRecord};
pub use spec::{RunSpec, StageSpec, DEFAULT_STAGE_TIMEOUT};
pub use state::{InMemoryRunStateStore, JsonFileRunStateStore, RunStateStore};
