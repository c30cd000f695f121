//! Core domain model types for opsflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Versioned artifacts and artifact references
//! - Run, stage and endpoint status enums
//! - Metrics

mod artifact;
mod metric;
mod status;

pub use artifact::{Artifact, ArtifactRef};
pub use metric::{Metric, ATTEMPT_DURATION_METRIC};
pub use status::{EndpointStatus, RunStatus, StageStatus};
