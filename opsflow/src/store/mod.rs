//! Versioned artifact storage.
//!
//! Every `put` creates a new immutable version of a key. Reads verify the
//! stored content hash so corruption is surfaced instead of propagated.
//!
//! Store operations are synchronous and may touch the filesystem. Async
//! callers go through [`blocking`], which runs them on the blocking pool.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use std::fmt::Debug;
use std::sync::Arc;

use crate::core::{Artifact, ArtifactRef};
use crate::errors::{OpsflowError, Result};

/// Storage backend for pipeline artifacts.
///
/// Implementations must serialize writes per key: concurrent `put` calls on
/// the same key each succeed with distinct, consecutive versions. A version
/// becomes visible to `get` only once fully written.
pub trait ArtifactStore: Send + Sync + Debug {
    /// Writes `content` as the next version of `key`.
    fn put(&self, key: &str, content: Vec<u8>) -> Result<Artifact>;

    /// Reads a version of `key`, or the latest one when `version` is `None`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key or version does not exist, `CorruptArtifact` if
    /// the content no longer matches its recorded hash.
    fn get(&self, key: &str, version: Option<u64>) -> Result<Artifact>;

    /// Lists the versions of `key` in ascending order.
    ///
    /// Unknown keys yield an empty list.
    fn list_versions(&self, key: &str) -> Result<Vec<u64>>;

    /// Lists all keys with at least one version.
    fn keys(&self) -> Result<Vec<String>>;

    /// Returns the latest version of `key`, if any.
    fn latest_version(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.list_versions(key)?.last().copied())
    }

    /// Returns true if `key` has at least one version.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(!self.list_versions(key)?.is_empty())
    }

    /// Resolves an artifact reference, checking that the stored hash still
    /// matches the one captured in the reference.
    fn resolve(&self, reference: &ArtifactRef) -> Result<Artifact> {
        let artifact = self.get(&reference.key, Some(reference.version))?;
        if artifact.content_hash != reference.content_hash {
            return Err(OpsflowError::CorruptArtifact {
                key: reference.key.clone(),
                version: reference.version,
                expected: reference.content_hash.clone(),
                actual: artifact.content_hash,
            });
        }
        Ok(artifact)
    }
}

/// Runs a store operation on tokio's blocking pool.
///
/// # Errors
///
/// Whatever `op` returns, or `Internal` if the blocking task panicked.
pub async fn blocking<T, F>(store: &Arc<dyn ArtifactStore>, op: F) -> Result<T>
where
    F: FnOnce(&dyn ArtifactStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| OpsflowError::Internal(format!("artifact store task failed: {e}")))?
}

pub(crate) fn missing(key: &str, version: Option<u64>) -> OpsflowError {
    match version {
        Some(v) => OpsflowError::not_found(format!("artifact '{key}' v{v}")),
        None => OpsflowError::not_found(format!("artifact '{key}'")),
    }
}

pub(crate) fn verify(artifact: Artifact) -> Result<Artifact> {
    let actual = artifact.recompute_hash();
    if actual != artifact.content_hash {
        tracing::error!(
            key = %artifact.key,
            version = artifact.version,
            "Artifact hash mismatch"
        );
        return Err(OpsflowError::CorruptArtifact {
            key: artifact.key,
            version: artifact.version,
            expected: artifact.content_hash,
            actual,
        });
    }
    Ok(artifact)
}
