//! Immutable, versioned artifacts.

use serde::{Deserialize, Serialize};

use crate::utils::{content_hash, iso_timestamp};

/// An immutable named blob produced or consumed by pipeline stages.
///
/// `(key, version)` is unique within a store. Writing an existing key
/// creates a new version; existing versions are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The logical key (e.g. "raw", "clean", "model").
    pub key: String,
    /// Monotonic version number within the key, starting at 1.
    pub version: u64,
    /// The opaque content.
    #[serde(skip)]
    pub content: Vec<u8>,
    /// SHA-256 hex digest of `content`, computed on write.
    pub content_hash: String,
    /// When the artifact was written (ISO 8601).
    pub created_at: String,
}

impl Artifact {
    /// Creates a new artifact, hashing its content.
    #[must_use]
    pub fn new(key: impl Into<String>, version: u64, content: Vec<u8>) -> Self {
        let content_hash = content_hash(&content);
        Self {
            key: key.into(),
            version,
            content,
            content_hash,
            created_at: iso_timestamp(),
        }
    }

    /// Recomputes the content hash.
    #[must_use]
    pub fn recompute_hash(&self) -> String {
        content_hash(&self.content)
    }

    /// Returns true if the stored hash matches the content.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.recompute_hash() == self.content_hash
    }

    /// Returns the content size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Returns a lightweight reference to this artifact.
    #[must_use]
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            key: self.key.clone(),
            version: self.version,
            content_hash: self.content_hash.clone(),
        }
    }
}

/// A reference to a specific artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact key.
    pub key: String,
    /// Artifact version.
    pub version: u64,
    /// Content hash at write time.
    pub content_hash: String,
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.key, self.version)
    }
}
