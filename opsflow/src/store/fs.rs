//! Directory-backed artifact store.
//!
//! Layout: `<root>/<hex(key)>/<version>.bin` holds the content and
//! `<root>/<hex(key)>/<version>.json` the metadata. The metadata file is
//! written last and is the commit point: a version without it is invisible.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{missing, verify, ArtifactStore};
use crate::core::Artifact;
use crate::errors::{OpsflowError, Result};

const BLOB_EXT: &str = "bin";
const META_EXT: &str = "json";

/// A durable artifact store rooted at a directory.
///
/// Writes to one key are serialized by an in-process lock. Sharing a root
/// between processes is not supported.
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FsArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "Opened artifact store");
        Ok(Self {
            root,
            key_locks: DashMap::new(),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn committed_versions(dir: &Path) -> Result<Vec<u64>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            if let Some(version) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &str, content: Vec<u8>) -> Result<Artifact> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let dir = self.key_dir(key);
        fs::create_dir_all(&dir)?;

        let version = Self::committed_versions(&dir)?.last().copied().unwrap_or(0) + 1;
        let artifact = Artifact::new(key, version, content);

        Self::write_atomic(
            &dir.join(format!("{version}.{BLOB_EXT}")),
            &artifact.content,
        )?;
        let meta = serde_json::to_vec_pretty(&artifact)?;
        Self::write_atomic(&dir.join(format!("{version}.{META_EXT}")), &meta)?;

        tracing::debug!(key, version, size = artifact.size(), "Stored artifact");
        Ok(artifact)
    }

    fn get(&self, key: &str, version: Option<u64>) -> Result<Artifact> {
        let dir = self.key_dir(key);
        let versions = Self::committed_versions(&dir)?;
        let version = match version {
            Some(v) if versions.binary_search(&v).is_ok() => v,
            None if !versions.is_empty() => versions[versions.len() - 1],
            _ => return Err(missing(key, version)),
        };

        let meta = fs::read(dir.join(format!("{version}.{META_EXT}")))?;
        let mut artifact: Artifact = serde_json::from_slice(&meta)?;
        artifact.content = fs::read(dir.join(format!("{version}.{BLOB_EXT}")))?;

        verify(artifact)
    }

    fn list_versions(&self, key: &str) -> Result<Vec<u64>> {
        Self::committed_versions(&self.key_dir(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let bytes = hex::decode(name)
                .map_err(|e| OpsflowError::Internal(format!("bad key directory '{name}': {e}")))?;
            let key = String::from_utf8(bytes)
                .map_err(|e| OpsflowError::Internal(format!("bad key directory '{name}': {e}")))?;
            if !Self::committed_versions(&entry.path())?.is_empty() {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_and_get_versions() {
        let (_dir, store) = store();
        store.put("raw/data.csv", b"a,b".to_vec()).unwrap();
        store.put("raw/data.csv", b"a,b,c".to_vec()).unwrap();

        assert_eq!(store.list_versions("raw/data.csv").unwrap(), vec![1, 2]);
        assert_eq!(store.get("raw/data.csv", Some(1)).unwrap().content, b"a,b");
        assert_eq!(store.get("raw/data.csv", None).unwrap().content, b"a,b,c");
        assert_eq!(store.keys().unwrap(), vec!["raw/data.csv".to_string()]);
    }

    #[test]
    fn test_reopen_sees_committed_versions() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsArtifactStore::open(dir.path()).unwrap();
            store.put("model", b"v1".to_vec()).unwrap();
        }
        let store = FsArtifactStore::open(dir.path()).unwrap();
        let next = store.put("model", b"v2".to_vec()).unwrap();

        assert_eq!(next.version, 2);
        assert_eq!(store.get("model", Some(1)).unwrap().content, b"v1");
    }

    #[test]
    fn test_uncommitted_blob_is_invisible() {
        let (_dir, store) = store();
        store.put("clean", b"ok".to_vec()).unwrap();

        let key_dir = store.key_dir("clean");
        fs::write(key_dir.join("2.bin"), b"half-written").unwrap();

        assert_eq!(store.list_versions("clean").unwrap(), vec![1]);
        assert_eq!(store.put("clean", b"next".to_vec()).unwrap().version, 2);
        assert_eq!(store.get("clean", Some(2)).unwrap().content, b"next");
    }

    #[test]
    fn test_corrupted_blob_detected() {
        let (_dir, store) = store();
        store.put("model", b"weights".to_vec()).unwrap();
        fs::write(store.key_dir("model").join("1.bin"), b"tampered").unwrap();

        let err = store.get("model", None).unwrap_err();
        assert!(matches!(err, OpsflowError::CorruptArtifact { version: 1, .. }));
    }

    #[test]
    fn test_missing_key_and_version() {
        let (_dir, store) = store();
        assert!(matches!(store.get("ghost", None), Err(OpsflowError::NotFound(_))));

        store.put("raw", vec![1]).unwrap();
        assert!(matches!(store.get("raw", Some(9)), Err(OpsflowError::NotFound(_))));
    }

    #[test]
    fn test_concurrent_puts_same_key() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .map(|i| store.put("shared", vec![t, i]).unwrap().version)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=40).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_runs_off_the_runtime_thread() {
        let (_dir, store) = store();
        let store: Arc<dyn ArtifactStore> = Arc::new(store);
        let runtime_thread = std::thread::current().id();

        let (written, thread) = crate::store::blocking(&store, |s| {
            Ok((s.put("model", b"w".to_vec())?, std::thread::current().id()))
        })
        .await
        .unwrap();
        let read = crate::store::blocking(&store, |s| s.get("model", None))
            .await
            .unwrap();

        assert_ne!(thread, runtime_thread);
        assert_eq!(read, written);
    }
}
