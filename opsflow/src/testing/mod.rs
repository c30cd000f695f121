//! Testing utilities for opsflow pipelines.
//!
//! This module provides:
//! - Mock transforms, notifiers and provisioners
//! - Assertions for runs and artifacts
//! - An engine fixture wired to in-memory collaborators

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_artifact_absent, assert_artifact_content, assert_run_status, assert_run_succeeded,
    assert_stage_status,
};
pub use fixtures::{ml_pipeline, TestEngine, SOURCE_KEY};
pub use mocks::{
    CollectingNotifier, ConcatTransform, CountingTransform, FailingTransform, FlakyTransform,
    GatedTransform, ScriptedProvisioner, SlowTransform, StaticTransform,
};
