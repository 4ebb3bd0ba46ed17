//! Cache decision engine: lookup, origin fetch, store, and status reporting.
//!
//! Per key the lifecycle is `empty -> fresh -> stale -> fresh ...`. Only a
//! fresh entry answers `HIT`; an absent key answers `MISS` and a stale one
//! answers `EXPIRED`, both after consulting the origin.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::header::AGE;
use axum::http::{HeaderMap, HeaderValue, Method};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::metrics::{CacheMetrics, CacheStats};
use super::policy::{self, CacheValid, Cacheability};
use super::store::{CacheStore, Lookup};
use super::{CacheStatus, ResponseParts};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::origin::{Origin, OriginRequest};

/// Runtime-adjustable engine switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub enabled: bool,
    pub max_entry_bytes: usize,
    pub cache_lock: bool,
}

impl From<&CacheConfig> for EngineSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_entry_bytes: config.max_entry_bytes,
            cache_lock: config.cache_lock,
        }
    }
}

/// An inbound request, resolved against the route table.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Client-facing path; part of the cache key.
    pub path: String,
    pub query: Option<String>,
    /// Path sent to the origin (may differ after prefix stripping).
    pub upstream_path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Caller-supplied namespace token; `None` selects the shared namespace.
    pub partition: Option<String>,
    /// Route defaults applied when the response has no freshness directive.
    pub cache_valid: Option<CacheValid>,
}

impl ProxyRequest {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(
            self.method.as_str(),
            &self.path,
            self.query.as_deref(),
            self.partition.as_deref(),
        )
    }

    fn origin_request(&self) -> OriginRequest {
        OriginRequest {
            method: self.method.clone(),
            path: self.upstream_path.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Response to send back, with the status for `X-Cache-Status`.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub status: CacheStatus,
    pub response: ResponseParts,
}

/// Owns the entry store; the only component that mutates entries.
pub struct CacheEngine {
    store: CacheStore,
    metrics: Arc<CacheMetrics>,
    settings: RwLock<EngineSettings>,
    fill_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl CacheEngine {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            store: CacheStore::new(config.max_entries),
            metrics: Arc::new(CacheMetrics::new()),
            settings: RwLock::new(EngineSettings::from(config)),
            fill_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.store.len())
    }

    pub fn settings(&self) -> EngineSettings {
        match self.settings.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply reloaded cache configuration.
    pub fn reconfigure(&self, config: &CacheConfig) {
        let next = EngineSettings::from(config);
        match self.settings.write() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        self.store.set_max_entries(config.max_entries);
    }

    /// Answer `request`, consulting `origin` unless a fresh entry exists.
    ///
    /// Origin errors are returned as-is and leave the store untouched.
    pub async fn handle(
        &self,
        request: ProxyRequest,
        origin: &dyn Origin,
    ) -> Result<CacheOutcome> {
        let settings = self.settings();
        if !settings.enabled || !is_cacheable_method(&request.method) {
            let response = self.fetch(&request, origin).await?;
            return Ok(self.finish(CacheStatus::Miss, response));
        }

        let key = request.cache_key();
        let status = match self.store.lookup(&key, Instant::now()) {
            Lookup::Fresh { response, age } => {
                debug!(key = %key.short(), path = %request.path, "Cache hit");
                return Ok(self.finish(CacheStatus::Hit, with_age(response, age)));
            }
            Lookup::Stale => CacheStatus::Expired,
            Lookup::Absent => CacheStatus::Miss,
        };

        if !settings.cache_lock {
            return self.fill(&key, status, &request, origin, &settings).await;
        }

        // The first request for a key fetches while holding the fill lock.
        // Later ones wait for it, then either serve what it stored or fetch
        // on their own without the lock.
        let slot = self.fill_slot(&key);
        let leader = slot.lock.try_lock().ok();
        if leader.is_none() {
            drop(slot.lock.lock().await);
        }
        let status = match self.store.lookup(&key, Instant::now()) {
            Lookup::Fresh { response, age } => {
                if leader.is_none() {
                    self.metrics.record_coalesced();
                    debug!(key = %key.short(), "Cache hit after waiting on fill lock");
                }
                return Ok(self.finish(CacheStatus::Hit, with_age(response, age)));
            }
            Lookup::Stale => CacheStatus::Expired,
            Lookup::Absent => CacheStatus::Miss,
        };
        let result = self.fill(&key, status, &request, origin, &settings).await;
        drop(leader);
        result
    }

    async fn fill(
        &self,
        key: &CacheKey,
        status: CacheStatus,
        request: &ProxyRequest,
        origin: &dyn Origin,
        settings: &EngineSettings,
    ) -> Result<CacheOutcome> {
        let response = self.fetch(request, origin).await?;
        let decision = policy::evaluate(
            response.status,
            &response.headers,
            request.cache_valid.as_ref(),
        );
        match decision {
            Cacheability::Store { ttl, source }
                if response.body.len() <= settings.max_entry_bytes =>
            {
                self.store
                    .insert(key.clone(), response.clone(), ttl, Instant::now());
                self.metrics.record_store();
                debug!(
                    key = %key.short(),
                    path = %request.path,
                    status = response.status.as_u16(),
                    ttl_secs = ttl.as_secs(),
                    source = %source,
                    "Stored response"
                );
            }
            Cacheability::Store { .. } => {
                self.drop_stale(key, status);
                self.metrics.record_bypass();
                debug!(
                    key = %key.short(),
                    bytes = response.body.len(),
                    limit = settings.max_entry_bytes,
                    "Response too large to store"
                );
            }
            Cacheability::Bypass(reason) => {
                self.drop_stale(key, status);
                self.metrics.record_bypass();
                debug!(
                    key = %key.short(),
                    path = %request.path,
                    reason = %reason,
                    "Response not cacheable"
                );
            }
        }
        Ok(self.finish(status, response))
    }

    async fn fetch(
        &self,
        request: &ProxyRequest,
        origin: &dyn Origin,
    ) -> Result<ResponseParts> {
        match origin.fetch(&request.origin_request()).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.metrics.record_origin_error();
                warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "Origin fetch failed"
                );
                Err(e)
            }
        }
    }

    /// A stale entry whose refetch is not storable returns the key to empty.
    fn drop_stale(&self, key: &CacheKey, status: CacheStatus) {
        if status == CacheStatus::Expired {
            self.store.remove(key);
        }
    }

    fn finish(&self, status: CacheStatus, response: ResponseParts) -> CacheOutcome {
        self.metrics.record_status(status);
        CacheOutcome { status, response }
    }

    fn fill_slot(&self, key: &CacheKey) -> FillSlot<'_> {
        let lock = Arc::clone(
            self.fill_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        FillSlot {
            locks: &self.fill_locks,
            key: key.clone(),
            lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_fill_locks(&self) -> usize {
        self.fill_locks.len()
    }
}

/// A handle on a key's fill lock.
///
/// Dropping the last handle removes the lock from the map, including when
/// the request future is cancelled mid-fill.
struct FillSlot<'a> {
    locks: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    lock: Arc<Mutex<()>>,
}

impl Drop for FillSlot<'_> {
    fn drop(&mut self) {
        // The map's reference plus ours: nobody else is waiting.
        self.locks
            .remove_if(&self.key, |_, held| Arc::strong_count(held) <= 2);
    }
}

/// Report how long a stored response has been cached.
fn with_age(mut response: ResponseParts, age: Duration) -> ResponseParts {
    response.headers.insert(AGE, HeaderValue::from(age.as_secs()));
    response
}

/// Only safe, idempotent reads are looked up and stored.
fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}
