//! # Opsflow
//!
//! Orchestration core for multi-stage ML operations pipelines.
//!
//! Opsflow provides:
//!
//! - **Versioned artifacts**: immutable, hash-verified versions per key
//! - **Retryable stages**: per-stage retry budgets, timeouts and backoff
//! - **Resumable runs**: persisted run state; resubmission skips completed work
//! - **Alarms**: edge-triggered threshold alarms over per-attempt metrics
//! - **Endpoint deployment**: atomic endpoint swaps through a provisioner
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use opsflow::prelude::*;
//!
//! let engine = PipelineEngine::new(Arc::new(InMemoryArtifactStore::new()));
//! engine.seed("source", b"rows".to_vec())?;
//!
//! let spec = RunSpec::new()
//!     .stage(StageSpec::new("ingest", "raw", Arc::new(IdentityTransform)).with_input("source"))
//!     .stage(StageSpec::new("train", "model", Arc::new(MyTrainer)).with_input("raw").with_retry_budget(3));
//!
//! let run = engine.run(spec).await?;
//! controller.publish_from_run("churn", &run, "model").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod monitor;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::cancellation::CancellationToken;
    pub use crate::config::OpsflowConfig;
    pub use crate::core::{Artifact, ArtifactRef, EndpointStatus, Metric, RunStatus, StageStatus};
    pub use crate::deploy::{DeploymentController, Endpoint, Provisioner};
    pub use crate::errors::{OpsflowError, PipelineValidationError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::monitor::{AlarmNotifier, AlarmSpec, Comparison, MetricRecorder, MonitorSink};
    pub use crate::pipeline::{
        BackoffPolicy, EngineBuilder, PipelineEngine, PipelineRun, RunSpec, StageSpec,
    };
    pub use crate::stages::{AsyncFnTransform, FnTransform, IdentityTransform, Transform};
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
