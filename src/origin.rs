//! Origin server access.
//!
//! `Origin` abstracts the upstream fetch so the cache engine can be tested
//! without a network. `HttpOrigin` forwards requests with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, Method};
use tracing::debug;
use url::Url;

use crate::cache::ResponseParts;
use crate::config::UpstreamConfig;
use crate::error::{GateError, Result};

/// Request as forwarded to the origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    /// Upstream path, after any route prefix stripping. Starts with `/`.
    pub path: String,
    pub query: Option<String>,
    /// End-to-end request headers.
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Fetches responses from the upstream server.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: &OriginRequest) -> Result<ResponseParts>;
}

/// Origin reached over HTTP(S) with a shared reqwest client.
pub struct HttpOrigin {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl HttpOrigin {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| GateError::Config(format!("upstream.url '{}': {}", config.url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GateError::Origin(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base,
            timeout: config.timeout(),
        })
    }

    /// Join the base URL's path with the upstream path and set the query.
    pub fn url_for(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: &OriginRequest) -> Result<ResponseParts> {
        let url = self.url_for(&request.path, request.query.as_deref());
        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        debug!(method = %request.method, url = %url, "Forwarding to origin");
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(ResponseParts {
            status,
            headers,
            body,
        })
    }
}

impl HttpOrigin {
    fn map_error(&self, err: reqwest::Error) -> GateError {
        if err.is_timeout() {
            GateError::OriginTimeout(self.timeout.as_secs())
        } else {
            GateError::Origin(err.to_string())
        }
    }
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove connection-scoped headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
