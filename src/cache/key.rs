//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `(method, path, query, partition)`.
///
/// Request cookies and other headers never take part in the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from request components.
    ///
    /// An empty query is the same as no query, and an empty partition token
    /// is the same as no token (the shared namespace). Each component is
    /// length-prefixed so `("/a?b", "")` and `("/a", "b")` cannot collide.
    pub fn derive(
        method: &str,
        path: &str,
        query: Option<&str>,
        partition: Option<&str>,
    ) -> Self {
        let mut hasher = Sha256::new();
        feed(&mut hasher, method.as_bytes());
        feed(&mut hasher, path.as_bytes());
        feed(&mut hasher, query.unwrap_or("").as_bytes());
        match partition.filter(|p| !p.is_empty()) {
            Some(token) => {
                hasher.update([1u8]);
                feed(&mut hasher, token.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
