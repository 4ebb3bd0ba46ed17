//! Fallback handler that runs every non-admin request through the cache.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{debug_span, Instrument};

use super::server::AppState;
use crate::cache::{CacheOutcome, CacheStatus, ProxyRequest, CACHE_STATUS_HEADER};
use crate::error::GateError;

/// Proxy one request through the cache engine.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let runtime = state.runtime();
    let path = uri.path().to_string();
    let resolved = runtime.routes.resolve(&path);
    let partition = headers
        .get(&runtime.partition_header)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let span = debug_span!(
        "proxy",
        method = %method,
        path = %path,
        route = resolved.route.as_deref().unwrap_or("-")
    );
    let request = ProxyRequest {
        method,
        path,
        query: uri.query().map(str::to_string),
        upstream_path: resolved.upstream_path,
        headers,
        body,
        partition,
        cache_valid: resolved.cache_valid,
    };

    let outcome = state
        .engine
        .handle(request, state.origin.as_ref())
        .instrument(span)
        .await;
    match outcome {
        Ok(outcome) => outcome.into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for CacheOutcome {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.response.body));
        *response.status_mut() = self.response.status;
        *response.headers_mut() = self.response.headers;
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, self.status.header_value());
        response
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match &self {
            GateError::OriginTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GateError::Origin(_) => StatusCode::BAD_GATEWAY,
            GateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut response = (status, self.to_string()).into_response();
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, CacheStatus::Miss.header_value());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseParts;
    use crate::config::{Config, RouteConfig};
    use crate::origin::mock::MockOrigin;
    use axum::http::header::CACHE_CONTROL;
    use axum::http::{HeaderValue, Request};
    use tower::util::ServiceExt;

    fn app(origin: MockOrigin, config: &Config) -> (axum::Router, Arc<MockOrigin>) {
        let origin = Arc::new(origin);
        let state = Arc::new(AppState::new(config, origin.clone()).unwrap());
        (super::super::server::build_router(state, 1024 * 1024), origin)
    }

    fn ok_with(cc: Option<&'static str>) -> MockOrigin {
        let mut headers = HeaderMap::new();
        if let Some(cc) = cc {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static(cc));
        }
        MockOrigin::always(ResponseParts {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"body"),
        })
    }

    async fn send(app: &axum::Router, uri: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-cache-key", "handler-test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_header_miss_then_hit() {
        let (app, origin) = app(ok_with(Some("max-age=10")), &Config::default());
        let first = send(&app, "/response-headers?x=1").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[CACHE_STATUS_HEADER], "MISS");
        let second = send(&app, "/response-headers?x=1").await;
        assert_eq!(second.headers()[CACHE_STATUS_HEADER], "HIT");
        assert_eq!(second.headers()[CACHE_CONTROL], "max-age=10");
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_route_defaults_and_strip_prefix() {
        let mut config = Config::default();
        config.routes.push(RouteConfig {
            prefix: "/proxy-cache-valid/".into(),
            strip_prefix: true,
            cache_valid: [("200".to_string(), 10)].into_iter().collect(),
        });
        let (app, origin) = app(ok_with(None), &config);
        let first = send(&app, "/proxy-cache-valid/status/200").await;
        assert_eq!(first.headers()[CACHE_STATUS_HEADER], "MISS");
        let forwarded = origin.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(forwarded.path, "/status/200");
        let second = send(&app, "/proxy-cache-valid/status/200").await;
        assert_eq!(second.headers()[CACHE_STATUS_HEADER], "HIT");
        assert!(!second.headers().contains_key(CACHE_CONTROL));
    }

    #[tokio::test]
    async fn test_origin_error_maps_to_bad_gateway() {
        let origin = ok_with(None).then(Err(GateError::Origin("refused".into())));
        let (app, _) = app(origin, &Config::default());
        let res = send(&app, "/down").await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(res.headers()[CACHE_STATUS_HEADER], "MISS");
    }

    #[tokio::test]
    async fn test_origin_timeout_maps_to_gateway_timeout() {
        let origin = ok_with(None).then(Err(GateError::OriginTimeout(30)));
        let (app, _) = app(origin, &Config::default());
        let res = send(&app, "/slow").await;
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_admin_paths_not_proxied() {
        let (app, origin) = app(ok_with(None), &Config::default());
        let res = send(&app, "/_cachegate/health").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key(CACHE_STATUS_HEADER));
        assert_eq!(origin.calls(), 0);
    }
}
