//! Store-or-bypass decision for origin responses.
//!
//! Rules, first match wins:
//!
//! 1. `Set-Cookie` on the response: never stored.
//! 2. `no-store` / `no-cache` / `private`: never stored.
//! 3. `s-maxage=n`: TTL is `n`, zero means bypass. Beats `max-age` and route defaults.
//! 4. `max-age=n`: TTL is `n`, zero means bypass. Beats route defaults.
//! 5. No freshness directive and a route `cache_valid` default for the status: that TTL.
//! 6. Otherwise: bypass.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};

use super::directives::DirectiveSet;

/// Per-route default TTLs keyed by response status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValid {
    by_status: BTreeMap<u16, Duration>,
    any: Option<Duration>,
}

impl CacheValid {
    pub fn with_status(mut self, status: StatusCode, ttl: Duration) -> Self {
        self.by_status.insert(status.as_u16(), ttl);
        self
    }

    pub fn with_any(mut self, ttl: Duration) -> Self {
        self.any = Some(ttl);
        self
    }

    /// Default TTL for `status`; an exact status entry beats the wildcard.
    pub fn ttl_for(&self, status: StatusCode) -> Option<Duration> {
        self.by_status.get(&status.as_u16()).copied().or(self.any)
    }

    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty() && self.any.is_none()
    }
}

/// Why a response was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    SetCookie,
    NoStore,
    SMaxAgeZero,
    MaxAgeZero,
    NoFreshness,
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BypassReason::SetCookie => "set-cookie",
            BypassReason::NoStore => "no-store",
            BypassReason::SMaxAgeZero => "s-maxage=0",
            BypassReason::MaxAgeZero => "max-age=0",
            BypassReason::NoFreshness => "no-freshness",
        };
        f.write_str(s)
    }
}

/// Which rule produced a stored TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlSource {
    SMaxAge,
    MaxAge,
    CacheValid,
}

impl fmt::Display for TtlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TtlSource::SMaxAge => "s-maxage",
            TtlSource::MaxAge => "max-age",
            TtlSource::CacheValid => "cache-valid",
        };
        f.write_str(s)
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheability {
    Store { ttl: Duration, source: TtlSource },
    Bypass(BypassReason),
}

impl Cacheability {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Cacheability::Store { ttl, .. } => Some(*ttl),
            Cacheability::Bypass(_) => None,
        }
    }
}

/// Decide whether an origin response may be stored, and for how long.
///
/// A `Cache-Control` header that carries no recognised freshness directive
/// (for example only `public`) is treated as absent, so route defaults
/// still apply to it.
pub fn evaluate(
    status: StatusCode,
    headers: &HeaderMap,
    defaults: Option<&CacheValid>,
) -> Cacheability {
    if headers.contains_key(SET_COOKIE) {
        return Cacheability::Bypass(BypassReason::SetCookie);
    }
    decide(
        status,
        DirectiveSet::from_headers(headers).unwrap_or_default(),
        defaults,
    )
}

/// Rules 2 to 6 on an already parsed directive set.
pub fn decide(
    status: StatusCode,
    directives: DirectiveSet,
    defaults: Option<&CacheValid>,
) -> Cacheability {
    if directives.forbids_storage() {
        return Cacheability::Bypass(BypassReason::NoStore);
    }
    if let Some(secs) = directives.s_maxage {
        return if secs == 0 {
            Cacheability::Bypass(BypassReason::SMaxAgeZero)
        } else {
            Cacheability::Store {
                ttl: Duration::from_secs(secs),
                source: TtlSource::SMaxAge,
            }
        };
    }
    if let Some(secs) = directives.max_age {
        return if secs == 0 {
            Cacheability::Bypass(BypassReason::MaxAgeZero)
        } else {
            Cacheability::Store {
                ttl: Duration::from_secs(secs),
                source: TtlSource::MaxAge,
            }
        };
    }
    match defaults.and_then(|d| d.ttl_for(status)) {
        Some(ttl) if !ttl.is_zero() => Cacheability::Store {
            ttl,
            source: TtlSource::CacheValid,
        },
        _ => Cacheability::Bypass(BypassReason::NoFreshness),
    }
}
