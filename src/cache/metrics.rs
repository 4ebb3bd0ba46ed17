//! Lock-free cache counters and their periodic log summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::CacheStatus;

const STATS_FLUSH_INTERVAL_SECS: u64 = 60;

/// Request and decision counters for the cache engine.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub requests: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub expired: AtomicU64,
    /// Responses written to the store.
    pub stores: AtomicU64,
    /// Responses the policy refused to store.
    pub bypasses: AtomicU64,
    /// Waiters that were answered by another request's origin fetch.
    pub coalesced: AtomicU64,
    pub origin_errors: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`] plus store size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub stores: u64,
    pub bypasses: u64,
    pub coalesced: u64,
    pub origin_errors: u64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a served response by its reported status.
    pub fn record_status(&self, status: CacheStatus) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            CacheStatus::Hit => &self.hits,
            CacheStatus::Miss => &self.misses,
            CacheStatus::Expired => &self.expired,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_error(&self) {
        self.origin_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            entries,
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            origin_errors: self.origin_errors.load(Ordering::Relaxed),
        }
    }

    /// Emit current counters as a structured log line.
    pub fn emit_summary(&self, reason: &str, entries: usize) {
        let s = self.snapshot(entries);
        info!(
            event = "cache_summary",
            reason = reason,
            entries = s.entries,
            requests = s.requests,
            hits = s.hits,
            misses = s.misses,
            expired = s.expired,
            stores = s.stores,
            bypasses = s.bypasses,
            coalesced = s.coalesced,
            origin_errors = s.origin_errors,
            "Cache metrics"
        );
    }
}

/// Start a background task that logs a cache summary every 60 seconds.
///
/// `entries` reports the current store size at emission time. Emits a final
/// `shutdown` summary when `shutdown_rx` signals `true`.
pub fn start_periodic_stats_flush<F>(
    metrics: Arc<CacheMetrics>,
    entries: F,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(STATS_FLUSH_INTERVAL_SECS));
        interval.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.emit_summary("periodic", entries());
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        metrics.emit_summary("shutdown", entries());
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_status_counts() {
        let m = CacheMetrics::new();
        m.record_status(CacheStatus::Miss);
        m.record_status(CacheStatus::Hit);
        m.record_status(CacheStatus::Hit);
        m.record_status(CacheStatus::Expired);
        let s = m.snapshot(3);
        assert_eq!(s.entries, 3);
        assert_eq!(s.requests, 4);
        assert_eq!(s.hits, 2);
        assert_eq!(s.misses, 1);
        assert_eq!(s.expired, 1);
    }

    #[test]
    fn test_decision_counters() {
        let m = CacheMetrics::new();
        m.record_store();
        m.record_bypass();
        m.record_bypass();
        m.record_coalesced();
        m.record_origin_error();
        let s = m.snapshot(0);
        assert_eq!(s.stores, 1);
        assert_eq!(s.bypasses, 2);
        assert_eq!(s.coalesced, 1);
        assert_eq!(s.origin_errors, 1);
    }

    #[tokio::test]
    async fn test_periodic_flush_stops_on_shutdown() {
        let metrics = Arc::new(CacheMetrics::new());
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = start_periodic_stats_flush(metrics, || 0, rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("flush task must exit on shutdown")
            .unwrap();
    }
}
