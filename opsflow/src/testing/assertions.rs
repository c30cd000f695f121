//! Test assertions for runs and artifacts.

use crate::core::{RunStatus, StageStatus};
use crate::pipeline::PipelineRun;
use crate::store::ArtifactStore;

/// Asserts that the run has the expected status.
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "Expected run '{}' to be {:?}, got {:?} (failure: {:?})",
        run.run_id, expected, run.status, run.failure
    );
}

/// Asserts that the run succeeded.
pub fn assert_run_succeeded(run: &PipelineRun) {
    assert_run_status(run, RunStatus::Succeeded);
}

/// Asserts that a stage of the run has the expected status.
pub fn assert_stage_status(run: &PipelineRun, stage: &str, expected: StageStatus) {
    let actual = run.stage(stage).map(|s| s.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{}' to be {:?}, got {:?}",
        stage,
        expected,
        actual
    );
}

/// Asserts that the latest version of `key` holds `expected`.
pub fn assert_artifact_content(store: &dyn ArtifactStore, key: &str, expected: &[u8]) {
    match store.get(key, None) {
        Ok(artifact) => assert_eq!(
            artifact.content, expected,
            "Unexpected content for artifact '{key}' v{}",
            artifact.version
        ),
        Err(e) => panic!("Expected artifact '{key}' to exist: {e}"),
    }
}

/// Asserts that `key` has no versions.
pub fn assert_artifact_absent(store: &dyn ArtifactStore, key: &str) {
    let versions = store.list_versions(key).unwrap_or_default();
    assert!(
        versions.is_empty(),
        "Expected no artifact '{key}', found versions {versions:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryArtifactStore;

    #[test]
    fn test_artifact_assertions() {
        let store = InMemoryArtifactStore::new();
        store.put("raw", b"abc".to_vec()).unwrap();

        assert_artifact_content(&store, "raw", b"abc");
        assert_artifact_absent(&store, "model");
    }

    #[test]
    #[should_panic(expected = "Expected no artifact 'raw'")]
    fn test_absent_assertion_panics() {
        let store = InMemoryArtifactStore::new();
        store.put("raw", b"abc".to_vec()).unwrap();
        assert_artifact_absent(&store, "raw");
    }
}
