//! Axum server for the caching proxy.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::routes::RouteTable;
use crate::cache::CacheEngine;
use crate::config::watcher::{ConfigWatcher, Reload};
use crate::config::Config;
use crate::error::{GateError, Result};
use crate::origin::Origin;

/// Path prefix reserved for the proxy's own endpoints.
pub const ADMIN_PREFIX: &str = "/_cachegate";

/// Settings that may change on config reload.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub routes: RouteTable,
    pub partition_header: HeaderName,
}

impl RuntimeConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let partition_header = HeaderName::from_bytes(config.cache.partition_header.as_bytes())
            .map_err(|_| {
                GateError::Config(format!(
                    "invalid partition header '{}'",
                    config.cache.partition_header
                ))
            })?;
        Ok(Self {
            routes: RouteTable::from_config(&config.routes)?,
            partition_header,
        })
    }
}

/// Shared state for the proxy and admin handlers.
pub struct AppState {
    pub engine: Arc<CacheEngine>,
    pub origin: Arc<dyn Origin>,
    runtime: RwLock<Arc<RuntimeConfig>>,
    upstream_url: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: &Config, origin: Arc<dyn Origin>) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(CacheEngine::new(&config.cache)),
            origin,
            runtime: RwLock::new(Arc::new(RuntimeConfig::from_config(config)?)),
            upstream_url: config.upstream.url.clone(),
            started_at: Utc::now(),
        })
    }

    /// Current routes and partition header.
    pub fn runtime(&self) -> Arc<RuntimeConfig> {
        match self.runtime.read() {
            Ok(r) => Arc::clone(&r),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a reloaded configuration.
    ///
    /// Routes, partition header and cache settings apply immediately. The
    /// listener address and upstream URL need a restart.
    pub fn apply_config(&self, config: &Config) -> Result<()> {
        let next = Arc::new(RuntimeConfig::from_config(config)?);
        let previous = self.runtime();
        let added: Vec<&str> = next
            .routes
            .prefixes()
            .filter(|p| !previous.routes.prefixes().any(|q| q == *p))
            .collect();
        let removed: Vec<&str> = previous
            .routes
            .prefixes()
            .filter(|p| !next.routes.prefixes().any(|q| q == *p))
            .collect();
        if !added.is_empty() || !removed.is_empty() {
            info!(added = ?added, removed = ?removed, "Route table changed");
        }
        let routes = next.routes.len();
        match self.runtime.write() {
            Ok(mut r) => *r = Arc::clone(&next),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&next),
        }
        self.engine.reconfigure(&config.cache);
        if config.upstream.url != self.upstream_url {
            warn!(
                current = %self.upstream_url,
                configured = %config.upstream.url,
                "upstream.url changed; restart to apply"
            );
        }
        info!(routes, cache_enabled = config.cache.enabled, "Applied reloaded config");
        Ok(())
    }
}

/// Build the router: admin endpoints first, everything else proxied.
pub fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            &format!("{ADMIN_PREFIX}/health"),
            get(super::admin::get_health),
        )
        .route(
            &format!("{ADMIN_PREFIX}/stats"),
            get(super::admin::get_stats),
        )
        .fallback(super::handler::proxy)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Poll `watcher` every `every` and apply valid reloads to `state`.
///
/// Runs until `shutdown_rx` signals `true` or its sender is dropped. A file
/// that fails to load or apply leaves the running configuration in place.
pub fn spawn_config_reloader(
    state: Arc<AppState>,
    mut watcher: ConfigWatcher,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(path = %watcher.path().display(), "Watching config file for changes");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Config reloader stopped");
                        return;
                    }
                    continue;
                }
            }
            let outcome = match watcher.poll() {
                Reload::Unchanged => continue,
                Reload::Loaded(config) => state.apply_config(&config),
                Reload::Rejected(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!(
                    path = %watcher.path().display(),
                    error = %e,
                    "Config reload rejected; keeping running configuration"
                );
            }
        }
    })
}

/// Bind and serve until `shutdown_rx` signals `true`.
pub async fn start_server(
    config: &Config,
    state: Arc<AppState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state, config.server.max_body_bytes);
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        upstream = %config.upstream.url,
        "cachegate listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await?;
    info!("cachegate stopped");
    Ok(())
}
