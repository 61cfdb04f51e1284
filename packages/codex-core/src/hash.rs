//! Content hashing.
//!
//! The cache engine keys on-disk content paths and verifies integrity with
//! SHA-256, per the `CacheEntry.hash` invariant. This mirrors the
//! workspace's established pattern of a small newtype wrapping a hex-encoded
//! digest (see the Blake3 wrapper this was adapted from), swapped to SHA-256
//! because the data model requires it explicitly.

use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A SHA-256 digest, rendered as lowercase hex.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a byte buffer.
    pub fn from_buffer(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash an arbitrary string (used for URI-derived cache paths).
    pub fn from_str_key(key: &str) -> Self {
        Self::from_buffer(key.as_bytes())
    }

    /// Construct from an already-computed hex digest (e.g. streamed hashing).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the hex digest into a `(prefix, rest)` pair for two-level
    /// directory fan-out, per the on-disk layout `{h2}/{h62}`.
    pub fn split_prefix(&self) -> (&str, &str) {
        self.0.split_at(2)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
