//! Reverse proxy to the origin renderer.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::application::error::HttpError;
use crate::config::OriginSettings;

const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build origin client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid origin url `{0}`")]
    Url(String),
    #[error("failed to read request body: {0}")]
    RequestBody(String),
    #[error("origin request timed out")]
    Timeout,
    #[error("origin request failed: {0}")]
    Upstream(#[source] reqwest::Error),
}

impl From<ProxyError> for HttpError {
    fn from(err: ProxyError) -> Self {
        let source = "infra::http::proxy";
        match &err {
            ProxyError::RequestBody(_) => HttpError::from_error(
                source,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body could not be read",
                &err,
            ),
            ProxyError::Timeout => {
                HttpError::from_error(source, StatusCode::GATEWAY_TIMEOUT, "Origin timed out", &err)
            }
            ProxyError::Client(_) | ProxyError::Url(_) | ProxyError::Upstream(_) => {
                HttpError::from_error(source, StatusCode::BAD_GATEWAY, "Origin unavailable", &err)
            }
        }
    }
}

/// Forwards requests to the origin and relays its responses unchanged.
pub struct OriginProxy {
    client: reqwest::Client,
    base: Url,
    preserve_host: bool,
}

impl OriginProxy {
    pub fn new(settings: &OriginSettings) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("redpage/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.timeout)
            .build()
            .map_err(ProxyError::Client)?;
        Ok(Self {
            client,
            base: settings.url.clone(),
            preserve_host: settings.preserve_host,
        })
    }

    fn target(&self, path_and_query: &str) -> Result<Url, ProxyError> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path_and_query}"))
            .map_err(|_| ProxyError::Url(path_and_query.to_string()))
    }

    pub async fn forward(&self, request: Request<Body>) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |value| value.as_str());
        let target = self.target(path_and_query)?;

        let mut headers = strip_hop_by_hop(parts.headers);
        // Stored pages are served as-is, so the origin must answer uncompressed.
        headers.remove(header::ACCEPT_ENCODING);
        if !self.preserve_host {
            headers.remove(header::HOST);
        }

        let body = axum::body::to_bytes(body, MAX_REQUEST_BYTES)
            .await
            .map_err(|err| ProxyError::RequestBody(err.to_string()))?;

        debug!(method = %parts.method, target = %target, "Forwarding to origin");
        let upstream = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(upstream_error)?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers().clone());
        let bytes = upstream.bytes().await.map_err(upstream_error)?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn upstream_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else {
        ProxyError::Upstream(err)
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
    headers
}

async fn forward(State(origin): State<Arc<OriginProxy>>, request: Request<Body>) -> Response {
    match origin.forward(request).await {
        Ok(response) => response,
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Router sending every request to the origin.
pub fn origin_router(proxy: OriginProxy) -> Router {
    Router::new().fallback(forward).with_state(Arc::new(proxy))
}
