//! Health and stats endpoints under `/_cachegate/`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use super::server::AppState;

/// GET /_cachegate/health: liveness plus uptime.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
        "uptime_secs": uptime.num_seconds().max(0),
    }))
}

/// GET /_cachegate/stats: cache counters and store size.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.engine.stats();
    let settings = state.engine.settings();
    Json(json!({
        "cache": stats,
        "store": {
            "max_entries": state.engine.store().max_entries(),
            "body_bytes": state.engine.store().total_body_bytes(),
        },
        "enabled": settings.enabled,
        "routes": state.runtime().routes.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseParts;
    use crate::config::Config;
    use crate::origin::mock::MockOrigin;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};

    fn state() -> State<Arc<AppState>> {
        let origin = MockOrigin::always(ResponseParts {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        });
        State(Arc::new(
            AppState::new(&Config::default(), Arc::new(origin)).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_get_health_returns_ok() {
        let Json(body) = get_health(state()).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn test_get_stats_shape() {
        let Json(body) = get_stats(state()).await;
        assert_eq!(body["cache"]["entries"], 0);
        assert_eq!(body["cache"]["hits"], 0);
        assert_eq!(body["store"]["max_entries"], 10_000);
        assert_eq!(body["enabled"], true);
    }
}
