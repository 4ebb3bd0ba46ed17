//! Proxy configuration: JSON file, environment overrides, validation.
//!
//! Load order (later wins): built-in defaults, `~/.cachegate/config.json`
//! (or the `--config` path), `CACHEGATE_*` environment variables. CLI flags
//! are applied on top by the binary.

pub mod watcher;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::policy::CacheValid;
use crate::error::{GateError, Result};

/// Default header carrying the caller-supplied cache partition token.
pub const DEFAULT_PARTITION_HEADER: &str = "X-Cache-Key";

/// Wildcard key in a route's `cache_valid` map matching any status code.
pub const CACHE_VALID_ANY: &str = "any";

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1).
    pub bind: String,
    /// Listen port.
    pub port: u16,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Origin server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the origin, e.g. `http://127.0.0.1:8000`.
    pub url: String,
    /// Per-request origin timeout.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every request is forwarded and reported as MISS.
    pub enabled: bool,
    /// Maximum number of stored entries before LRU eviction.
    pub max_entries: usize,
    /// Responses with larger bodies are forwarded but never stored.
    pub max_entry_bytes: usize,
    /// Request header whose value partitions the cache namespace.
    pub partition_header: String,
    /// Concurrent misses for a key wait on the first origin fetch and are
    /// served from it when it was stored.
    pub cache_lock: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_entry_bytes: 8 * 1024 * 1024,
            partition_header: DEFAULT_PARTITION_HEADER.to_string(),
            cache_lock: true,
        }
    }
}

/// A path-prefix route with optional cache-valid defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Path prefix this route matches; must start with `/`.
    pub prefix: String,
    /// Remove the prefix before forwarding to the origin.
    pub strip_prefix: bool,
    /// Default TTL in seconds per status code (`"200"`, `"404"`, or `"any"`),
    /// used only when the response carries no freshness directive.
    pub cache_valid: BTreeMap<String, u64>,
}

impl RouteConfig {
    /// Parse the `cache_valid` map into typed defaults.
    pub fn cache_valid(&self) -> Result<CacheValid> {
        let mut valid = CacheValid::default();
        for (status, secs) in &self.cache_valid {
            let ttl = Duration::from_secs(*secs);
            if status.eq_ignore_ascii_case(CACHE_VALID_ANY) {
                valid = valid.with_any(ttl);
                continue;
            }
            let code = status
                .parse::<u16>()
                .ok()
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| {
                    GateError::Config(format!(
                        "route '{}': cache_valid key '{}' is not a status code or 'any'",
                        self.prefix, status
                    ))
                })?;
            valid = valid.with_status(code, ttl);
        }
        Ok(valid)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub routes: Vec<RouteConfig>,
}

impl Config {
    /// Default config file location: `~/.cachegate/config.json`.
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cachegate")
            .join("config.json")
    }

    /// Load from the default path, falling back to defaults when the file
    /// does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::path();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load a config file, apply environment overrides and validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&data)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document without env overrides or validation.
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Apply `CACHEGATE_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("CACHEGATE_SERVER_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("CACHEGATE_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("CACHEGATE_UPSTREAM_URL") {
            self.upstream.url = url;
        }
        if let Some(secs) = lookup("CACHEGATE_UPSTREAM_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.upstream.timeout_secs = secs;
        }
        if let Some(enabled) = lookup("CACHEGATE_CACHE_ENABLED").and_then(|v| parse_bool(&v)) {
            self.cache.enabled = enabled;
        }
        if let Some(max) = lookup("CACHEGATE_CACHE_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.cache.max_entries = max;
        }
    }

    /// Reject configurations the proxy cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GateError::Config("server.port must be non-zero".into()));
        }
        let upstream = url::Url::parse(&self.upstream.url).map_err(|e| {
            GateError::Config(format!("upstream.url '{}': {}", self.upstream.url, e))
        })?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(GateError::Config(format!(
                "upstream.url must be http or https, got '{}'",
                upstream.scheme()
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(GateError::Config(
                "upstream.timeout_secs must be non-zero".into(),
            ));
        }
        HeaderName::from_bytes(self.cache.partition_header.as_bytes()).map_err(|_| {
            GateError::Config(format!(
                "cache.partition_header '{}' is not a valid header name",
                self.cache.partition_header
            ))
        })?;
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(GateError::Config(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }
            route.cache_valid()?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.cache.enabled);
        assert!(cfg.cache.cache_lock);
        assert_eq!(cfg.cache.partition_header, "X-Cache-Key");
        assert!(cfg.routes.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{
            "server": {"port": 9000},
            "routes": [
                {"prefix": "/proxy-cache-valid/", "strip_prefix": true, "cache_valid": {"200": 10}}
            ]
        }"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "127.0.0.1"); // default
        assert_eq!(cfg.routes.len(), 1);
        assert!(cfg.routes[0].strip_prefix);
        assert_eq!(cfg.routes[0].cache_valid.get("200"), Some(&10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CACHEGATE_SERVER_PORT", "9191"),
            ("CACHEGATE_UPSTREAM_URL", "http://origin.internal:81"),
            ("CACHEGATE_CACHE_ENABLED", "off"),
            ("CACHEGATE_CACHE_MAX_ENTRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.server.port, 9191);
        assert_eq!(cfg.upstream.url, "http://origin.internal:81");
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.cache.max_entries, 10_000); // unparseable ignored
    }

    #[test]
    fn test_validate_rejects_bad_upstream() {
        let mut cfg = Config::default();
        cfg.upstream.url = "not a url".into();
        assert!(cfg.validate().is_err());
        cfg.upstream.url = "ftp://example.com".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_route() {
        let mut cfg = Config::default();
        cfg.routes.push(RouteConfig {
            prefix: "no-slash".into(),
            ..Default::default()
        });
        assert!(cfg.validate().is_err());

        cfg.routes[0].prefix = "/ok/".into();
        cfg.routes[0].cache_valid.insert("two-hundred".into(), 10);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("two-hundred"));
    }

    #[test]
    fn test_validate_rejects_bad_partition_header() {
        let mut cfg = Config::default();
        cfg.cache.partition_header = "bad header".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_route_cache_valid_any() {
        let route = RouteConfig {
            prefix: "/".into(),
            strip_prefix: false,
            cache_valid: [("200".to_string(), 10), ("any".to_string(), 1)]
                .into_iter()
                .collect(),
        };
        let valid = route.cache_valid().unwrap();
        assert_eq!(valid.ttl_for(StatusCode::OK), Some(Duration::from_secs(10)));
        assert_eq!(
            valid.ttl_for(StatusCode::NOT_FOUND),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_load_from_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"upstream": {"url": "http://localhost:7000"}}"#).unwrap();
        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.upstream.url, "http://localhost:7000");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}
