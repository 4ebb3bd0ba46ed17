//! Stored responses.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

/// Response parts kept in the cache and replayed on a hit.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A cached response with its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: ResponseParts,
    /// When the response was stored.
    pub stored_at: Instant,
    /// Freshness lifetime computed by the policy.
    pub ttl: Duration,
    /// Last time the entry was served; drives LRU eviction.
    pub last_access: Instant,
    /// Number of times the entry was served from cache.
    pub hits: u64,
}

impl CacheEntry {
    pub fn new(response: ResponseParts, ttl: Duration, now: Instant) -> Self {
        Self {
            response,
            stored_at: now,
            ttl,
            last_access: now,
            hits: 0,
        }
    }

    /// Fresh while `now <= stored_at + ttl`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    pub fn body_len(&self) -> usize {
        self.response.body.len()
    }
}
