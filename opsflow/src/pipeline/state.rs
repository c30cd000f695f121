//! Durable run state.
//!
//! The engine persists a run's record after every status change so that a
//! re-submission under the same run id can resume where it stopped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::run::PipelineRun;
use crate::errors::Result;

/// Storage backend for run records.
#[async_trait]
pub trait RunStateStore: Send + Sync + Debug {
    /// Saves (replacing) the record for `run.run_id`.
    async fn save(&self, run: &PipelineRun) -> Result<()>;

    /// Loads the record for `run_id`, if one was saved.
    async fn load(&self, run_id: &str) -> Result<Option<PipelineRun>>;

    /// Lists saved run ids in ascending order.
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-memory run state.
#[derive(Debug, Default)]
pub struct InMemoryRunStateStore {
    runs: Mutex<HashMap<String, PipelineRun>>,
}

impl InMemoryRunStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of saved runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    /// Returns true if no run was saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }
}

#[async_trait]
impl RunStateStore for InMemoryRunStateStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        self.runs.lock().insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<PipelineRun>> {
        Ok(self.runs.lock().get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.runs.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON document per run under a directory.
///
/// Each save writes a temporary file and renames it over `<run_id>.json`,
/// so a crash leaves either the previous or the new record.
#[derive(Debug, Clone)]
pub struct JsonFileRunStateStore {
    dir: PathBuf,
}

impl JsonFileRunStateStore {
    /// Opens (creating if needed) a store under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl RunStateStore for JsonFileRunStateStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        let path = self.path_for(&run.run_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", run.run_id));
        let bytes = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(run_id = %run.run_id, status = %run.status, "Saved run state");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<PipelineRun>> {
        match tokio::fs::read(self.path_for(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::pipeline::{RunSpec, StageSpec};
    use crate::stages::IdentityTransform;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn run(id: &str) -> PipelineRun {
        let spec = RunSpec::new().stage(StageSpec::new("a", "x", Arc::new(IdentityTransform)));
        PipelineRun::new(id, &spec, 1)
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryRunStateStore::new();
        tokio_test::block_on(async {
            assert!(store.load("r1").await.unwrap().is_none());

            let mut record = run("r1");
            store.save(&record).await.unwrap();
            record.transition(RunStatus::Running);
            store.save(&record).await.unwrap();

            assert_eq!(store.load("r1").await.unwrap().unwrap().status, RunStatus::Running);
        });
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileRunStateStore::open(dir.path()).unwrap();
            let mut record = run("r2");
            record.transition(RunStatus::Running);
            record.transition(RunStatus::Failed);
            store.save(&record).await.unwrap();
            store.save(&run("r1")).await.unwrap();
        }

        let store = JsonFileRunStateStore::open(dir.path()).unwrap();
        let loaded = store.load("r2").await.unwrap().unwrap();

        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(store.list().await.unwrap(), vec!["r1".to_string(), "r2".to_string()]);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileRunStateStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        assert!(store.load("bad").await.is_err());
    }
}
