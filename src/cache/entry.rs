//! Cache Entry Types

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// Cache entry: an optional serialized payload plus its creation time.
///
/// Entries are replaced whole on every `set`, never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized order, absent in presence-only mode
    payload: Option<Bytes>,
    /// Creation time
    created_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry stamped with the current time
    pub fn new(payload: Option<Bytes>) -> Self {
        Self {
            payload,
            created_at: Instant::now(),
        }
    }

    /// Get the payload, if any
    #[inline]
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Get the creation time
    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Age of the entry at `now`
    #[inline]
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Check if the entry has outlived `ttl` at `now`. No TTL means no expiry.
    #[inline]
    pub fn is_expired_at(&self, ttl: Option<Duration>, now: Instant) -> bool {
        match ttl {
            Some(ttl) => self.age_at(now) > ttl,
            None => false,
        }
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }
}

/// What a cache lookup found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    /// The identifier is known to be persisted; no payload is cached
    Present,
    /// The serialized order
    Payload(Bytes),
}

impl CacheHit {
    /// Get the payload, if this hit carries one
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            CacheHit::Present => None,
            CacheHit::Payload(bytes) => Some(bytes),
        }
    }
}

/// Diagnostic view of one live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    pub key: String,
    pub age: Duration,
    pub payload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new(None);
        let ttl = Some(Duration::from_secs(10));

        let start = entry.created_at();
        assert!(!entry.is_expired_at(ttl, start));
        assert!(!entry.is_expired_at(ttl, start + Duration::from_secs(10)));
        assert!(entry.is_expired_at(ttl, start + Duration::from_millis(10_001)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(Some(Bytes::from_static(b"{}")));
        let later = entry.created_at() + Duration::from_secs(365 * 24 * 3600);
        assert!(!entry.is_expired_at(None, later));
        assert_eq!(entry.size(), 2);
    }

    #[test]
    fn test_cache_hit_payload() {
        assert_eq!(CacheHit::Present.payload(), None);
        let hit = CacheHit::Payload(Bytes::from_static(b"data"));
        assert_eq!(hit.payload().unwrap().as_ref(), b"data");
    }
}
