//! Content hashing for artifacts and stage fingerprints.

use sha2::{Digest, Sha256};

/// Returns the SHA-256 hex digest of `content`.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Computes a fingerprint over an ordered list of `(key, content_hash)` pairs.
///
/// Two input sets produce the same fingerprint only if they list the same keys
/// in the same order with the same content hashes.
#[must_use]
pub fn fingerprint<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (key, hash) in entries {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}
