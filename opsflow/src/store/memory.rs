//! In-memory artifact store.

use dashmap::DashMap;

use super::{missing, verify, ArtifactStore};
use crate::core::Artifact;
use crate::errors::Result;

/// An artifact store held entirely in memory.
///
/// Each key owns a version list; a `put` holds the key's entry lock while it
/// allocates the next version and appends, which serializes writers per key.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<String, Vec<Artifact>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored versions across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, key: &str, version: u64, content: Vec<u8>) {
        if let Some(mut versions) = self.artifacts.get_mut(key) {
            if let Some(artifact) = versions.get_mut(version as usize - 1) {
                artifact.content = content;
            }
        }
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, key: &str, content: Vec<u8>) -> Result<Artifact> {
        let mut versions = self.artifacts.entry(key.to_string()).or_default();
        let version = versions.len() as u64 + 1;
        let artifact = Artifact::new(key, version, content);
        versions.push(artifact.clone());

        tracing::debug!(key, version, size = artifact.size(), "Stored artifact");
        Ok(artifact)
    }

    fn get(&self, key: &str, version: Option<u64>) -> Result<Artifact> {
        let versions = self.artifacts.get(key).ok_or_else(|| missing(key, version))?;
        let artifact = match version {
            Some(0) => None,
            Some(v) => versions.get(v as usize - 1),
            None => versions.last(),
        }
        .cloned()
        .ok_or_else(|| missing(key, version))?;
        drop(versions);

        verify(artifact)
    }

    fn list_versions(&self, key: &str) -> Result<Vec<u64>> {
        Ok(self
            .artifacts
            .get(key)
            .map(|versions| versions.iter().map(|a| a.version).collect())
            .unwrap_or_default())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.artifacts.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OpsflowError;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_put_creates_new_versions() {
        let store = InMemoryArtifactStore::new();
        let a1 = store.put("raw", b"one".to_vec()).unwrap();
        let a2 = store.put("raw", b"two".to_vec()).unwrap();

        assert_eq!(a1.version, 1);
        assert_eq!(a2.version, 2);
        assert_eq!(store.list_versions("raw").unwrap(), vec![1, 2]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_old_versions_are_immutable() {
        let store = InMemoryArtifactStore::new();
        store.put("raw", b"first".to_vec()).unwrap();
        store.put("raw", b"second".to_vec()).unwrap();

        assert_eq!(store.get("raw", Some(1)).unwrap().content, b"first");
        assert_eq!(store.get("raw", None).unwrap().content, b"second");
    }

    #[test]
    fn test_get_missing() {
        let store = InMemoryArtifactStore::new();
        assert!(matches!(store.get("nope", None), Err(OpsflowError::NotFound(_))));

        store.put("raw", b"x".to_vec()).unwrap();
        assert!(matches!(store.get("raw", Some(2)), Err(OpsflowError::NotFound(_))));
        assert!(matches!(store.get("raw", Some(0)), Err(OpsflowError::NotFound(_))));
    }

    #[test]
    fn test_list_versions_unknown_key_is_empty() {
        let store = InMemoryArtifactStore::new();
        assert!(store.list_versions("ghost").unwrap().is_empty());
        assert!(!store.contains("ghost").unwrap());
        assert_eq!(store.latest_version("ghost").unwrap(), None);
    }

    #[test]
    fn test_corruption_detected_on_read() {
        let store = InMemoryArtifactStore::new();
        store.put("model", b"weights".to_vec()).unwrap();
        store.tamper("model", 1, b"poisoned".to_vec());

        let err = store.get("model", Some(1)).unwrap_err();
        assert!(matches!(err, OpsflowError::CorruptArtifact { ref key, version: 1, .. } if key == "model"));
    }

    #[test]
    fn test_resolve_checks_reference_hash() {
        let store = InMemoryArtifactStore::new();
        let artifact = store.put("clean", b"rows".to_vec()).unwrap();

        let mut reference = artifact.to_ref();
        assert_eq!(store.resolve(&reference).unwrap().content, b"rows");

        reference.content_hash = "0".repeat(64);
        assert!(matches!(
            store.resolve(&reference),
            Err(OpsflowError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_concurrent_puts_same_key() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let per_thread = 50;

        let handles: Vec<_> = (0..2)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..per_thread)
                        .map(|i| store.put("shared", format!("{t}-{i}").into_bytes()).unwrap().version)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();

        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), 2 * per_thread);
        assert_eq!(all, (1..=2 * per_thread as u64).collect::<Vec<_>>());
        assert_eq!(store.list_versions("shared").unwrap(), all);
    }

    #[test]
    fn test_keys_sorted() {
        let store = InMemoryArtifactStore::new();
        store.put("b", vec![]).unwrap();
        store.put("a", vec![]).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
