//! HTTP response caching driven by `Cache-Control` and route defaults.
//!
//! - [`key`]: cache key derivation (method, path, query, partition token)
//! - [`directives`]: `Cache-Control` parsing
//! - [`policy`]: store-or-bypass decision and TTL
//! - [`store`]: concurrent entry map with LRU eviction
//! - [`engine`]: lookup / fetch / store orchestration

pub mod directives;
pub mod engine;
pub mod entry;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod store;

use std::fmt;

use axum::http::HeaderValue;

pub use directives::DirectiveSet;
pub use engine::{CacheEngine, CacheOutcome, EngineSettings, ProxyRequest};
pub use entry::{CacheEntry, ResponseParts};
pub use key::CacheKey;
pub use metrics::{CacheMetrics, CacheStats};
pub use policy::{BypassReason, CacheValid, Cacheability, TtlSource};
pub use store::{CacheStore, Lookup};

/// Response header reporting how the cache answered.
pub const CACHE_STATUS_HEADER: &str = "x-cache-status";

/// How a request was answered, reported in `X-Cache-Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh stored entry.
    Hit,
    /// No entry existed; the origin was consulted.
    Miss,
    /// An entry existed but was stale; the origin was consulted.
    Expired,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Expired => "EXPIRED",
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(CacheStatus::Hit.to_string(), "HIT");
        assert_eq!(CacheStatus::Miss.as_str(), "MISS");
        assert_eq!(CacheStatus::Expired.header_value(), "EXPIRED");
    }
}
