//! `CacheEntry` and the derived status of an entry at query time.

use derive_more::Debug;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

pub(crate) fn format_epoch_seconds(seconds: i64) -> String {
    Timestamp::from_second(seconds)
        .map(|t| t.to_string())
        .unwrap_or_else(|_| format!("{seconds:?}"))
}

/// A stored document. Mutated only by last-accessed bumps on read;
/// destroyed on invalidation, explicit clear, LRU eviction, or TTL sweep.
///
/// Timestamps are raw Unix-epoch seconds, injected by the caller rather
/// than read from the system clock, so the cache stays trivially
/// testable; `Debug` renders them as RFC 3339 via `jiff` for readability.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub uri: String,
    #[serde(skip)]
    #[debug(skip)]
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub size: u64,
    pub hash: ContentHash,
    #[debug("{}", format_epoch_seconds(*created_at))]
    pub created_at: i64,
    pub ttl: u64,
    #[debug("{}", format_epoch_seconds(*expires_at))]
    pub expires_at: i64,
    #[debug("{}", format_epoch_seconds(*last_accessed))]
    pub last_accessed: i64,
    pub source: String,
}

impl CacheEntry {
    pub fn new(uri: impl Into<String>, content: Vec<u8>, content_type: Option<String>, source: impl Into<String>, ttl: u64, now: i64) -> Self {
        let hash = ContentHash::from_buffer(&content);
        let size = content.len() as u64;
        Self {
            uri: uri.into(),
            content,
            content_type,
            size,
            hash,
            created_at: now,
            ttl,
            expires_at: now + ttl as i64,
            last_accessed: now,
            source: source.into(),
        }
    }

    /// `fresh` if `now <= expiration`; `stale` if `expiration < now <=
    /// expiration + stale_window`; `expired` otherwise.
    pub fn status(&self, now: i64, stale_window: u64) -> CacheStatus {
        if now <= self.expires_at {
            CacheStatus::Fresh
        } else if now <= self.expires_at + stale_window as i64 {
            CacheStatus::Stale
        } else {
            CacheStatus::Expired
        }
    }

    pub fn touch(&mut self, now: i64) {
        self.last_accessed = now;
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CacheStatus {
    Fresh,
    Stale,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn status_is_fresh_before_expiration() {
        let entry = CacheEntry::new("codex://a/b/c", vec![1, 2, 3], None, "http", 100, 0);
        pretty_assert_eq!(entry.status(50, 10), CacheStatus::Fresh);
    }

    #[test]
    fn status_is_stale_within_stale_window() {
        let entry = CacheEntry::new("codex://a/b/c", vec![1, 2, 3], None, "http", 100, 0);
        pretty_assert_eq!(entry.status(105, 10), CacheStatus::Stale);
    }

    #[test]
    fn status_is_expired_past_stale_window() {
        let entry = CacheEntry::new("codex://a/b/c", vec![1, 2, 3], None, "http", 100, 0);
        pretty_assert_eq!(entry.status(120, 10), CacheStatus::Expired);
    }

    #[test]
    fn size_and_hash_invariants_hold_at_construction() {
        let content = b"hello world".to_vec();
        let entry = CacheEntry::new("codex://a/b/c", content.clone(), None, "http", 100, 0);
        pretty_assert_eq!(entry.size, content.len() as u64);
        pretty_assert_eq!(entry.hash, ContentHash::from_buffer(&content));
        pretty_assert_eq!(entry.expires_at, entry.created_at + entry.ttl as i64);
    }
}
