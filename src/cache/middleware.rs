//! Full-page cache middleware.
//!
//! Builds a [`RequestContext`], evaluates predicates against the store, selects one
//! [`Action`] and performs its side effects around the inner (origin) service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::cascade::{Cascade, CascadePlan};
use super::config::CacheConfig;
use super::context::RequestContext;
use super::decision::{Action, evaluate, record_store_error, select};
use super::keys::{KeyBuilder, Namespace};
use super::store::KvStore;
use crate::application::repos::ContentSource;

const METRIC_ACTION: &str = "redpage_cache_action_total";
const METRIC_REQUEST_MS: &str = "redpage_cache_request_ms";

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<dyn KvStore>,
    pub content: Option<Arc<dyn ContentSource>>,
}

impl CacheState {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn KvStore>,
        content: Option<Arc<dyn ContentSource>>,
    ) -> Self {
        Self {
            config,
            store,
            content,
        }
    }

    /// Cascade executor bound to `keys`' domain.
    pub fn cascade(&self, keys: KeyBuilder) -> Cascade {
        Cascade::new(
            self.store.clone(),
            keys,
            self.content.clone(),
            self.config.excluded_categories.clone(),
            self.config.page_size(),
        )
    }
}

/// Middleware for full-page caching.
///
/// Store failures never reach the visitor: they degrade the request to a bypass.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let started_at = Instant::now();
    let ctx = RequestContext::new(
        request.method(),
        request.uri(),
        request.headers(),
        &cache.config,
    );
    let predicates = evaluate(&ctx, cache.store.as_ref(), &cache.config).await;
    let action = select(&predicates);

    debug!(
        action = action.label(),
        domain = ctx.domain.as_deref(),
        normalized = ctx.path.as_str(),
        page_type = ctx.classification.page_type.as_str(),
        "Cache action selected"
    );
    counter!(METRIC_ACTION, "action" => action.label()).increment(1);

    let (response, outcome) = match action {
        Action::CacheHit(body) => (cached_response(body), Outcome::Hit),
        Action::DeleteDomain { forced } => {
            purge(&cache, &ctx, Cascade::flush_plan).await;
            let outcome = if forced {
                Outcome::DomainFlushForced
            } else {
                Outcome::DomainFlushed
            };
            (next.run(request).await, outcome)
        }
        Action::DeletePage => {
            let namespace = Namespace::for_page(ctx.classification.page_type);
            let path = &ctx.path;
            purge(&cache, &ctx, move |_| CascadePlan::purge_page(namespace, path)).await;
            (next.run(request).await, Outcome::PageDeleted)
        }
        Action::Bypass(reason) => {
            debug!(reason = reason.as_str(), "Bypassing cache");
            (next.run(request).await, Outcome::Bypassed)
        }
        Action::RenderAndStore => {
            let rendered = next.run(request).await;
            store_rendered(&cache, &ctx, rendered).await
        }
    };

    let elapsed = started_at.elapsed();
    histogram!(METRIC_REQUEST_MS).record(elapsed.as_secs_f64() * 1000.0);

    let mut response = response;
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(outcome.header()));

    if cache.config.debug_comment {
        annotate(response, &cache.config.site_name, outcome.message(), elapsed).await
    } else {
        response
    }
}

/// What the client-visible response reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Hit,
    Stored,
    NotStored,
    Bypassed,
    PageDeleted,
    DomainFlushed,
    DomainFlushForced,
}

impl Outcome {
    fn header(self) -> &'static str {
        match self {
            Outcome::Hit => "HIT",
            Outcome::Stored | Outcome::NotStored => "MISS",
            Outcome::Bypassed => "BYPASS",
            Outcome::PageDeleted | Outcome::DomainFlushed | Outcome::DomainFlushForced => "PURGE",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Outcome::Hit => "this is a cache",
            Outcome::Stored => "cache is set",
            Outcome::NotStored => "not cached",
            Outcome::Bypassed => "raw page, bypassing cache",
            Outcome::PageDeleted => "cache of page deleted",
            Outcome::DomainFlushed => "domain cache deleted",
            Outcome::DomainFlushForced => "domain cache deleted (memory limit reached)",
        }
    }
}

async fn purge(
    cache: &CacheState,
    ctx: &RequestContext,
    plan_for: impl FnOnce(&Cascade) -> CascadePlan,
) {
    let Some(keys) = ctx.keys() else {
        return;
    };
    let domain = keys.domain().to_string();
    let cascade = cache.cascade(keys);
    let plan = plan_for(&cascade);
    match cascade.run(&plan).await {
        Ok(report) => info!(
            domain = %domain,
            plan = %plan,
            keys_deleted = report.keys_deleted,
            fields_deleted = report.fields_deleted,
            "Cache purged on request"
        ),
        Err(err) => warn!(
            domain = %domain,
            plan = %plan,
            error = %err,
            "Cache purge failed; rendering anyway"
        ),
    }
}

fn cached_response(body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Whether a freshly rendered response may be written to the cache.
pub fn should_store_response(
    response: &Response,
    ctx: &RequestContext,
    max_body_bytes: usize,
) -> bool {
    if response.status() != StatusCode::OK || ctx.directives.search {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(header::SET_COOKIE) {
        return false;
    }

    if let Some(value) = headers.get(header::CONTENT_TYPE) {
        let is_html = value
            .to_str()
            .is_ok_and(|value| value.to_ascii_lowercase().starts_with("text/html"));
        if !is_html {
            return false;
        }
    }

    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    !declared_len.is_some_and(|len| len > max_body_bytes)
}

async fn store_rendered(
    cache: &CacheState,
    ctx: &RequestContext,
    response: Response,
) -> (Response, Outcome) {
    let Some(keys) = ctx.keys() else {
        return (response, Outcome::NotStored);
    };
    if !should_store_response(&response, ctx, cache.config.max_body_bytes) {
        return (response, Outcome::NotStored);
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_within(body, cache.config.max_body_bytes).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Oversized(body) => {
            debug!(
                limit = cache.config.max_body_bytes,
                "Rendered body exceeds cache limit"
            );
            return (Response::from_parts(parts, body), Outcome::NotStored);
        }
        Buffered::Failed(err) => {
            warn!(error = %err, "Failed to buffer rendered body");
            return (
                Response::from_parts(parts, Body::empty()),
                Outcome::NotStored,
            );
        }
    };

    let stored = write_page(cache, ctx, &keys, bytes.clone()).await;
    let outcome = if stored {
        Outcome::Stored
    } else {
        Outcome::NotStored
    };
    (Response::from_parts(parts, Body::from(bytes)), outcome)
}

enum Buffered {
    Complete(Bytes),
    /// Limit exceeded; the body replays what was read, then streams the rest.
    Oversized(Body),
    Failed(axum::Error),
}

/// Read `body` into memory, stopping as soon as it grows past `limit` bytes.
async fn buffer_within(mut body: Body, limit: usize) -> Buffered {
    let mut buffered = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return Buffered::Failed(err),
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        buffered.extend_from_slice(&data);

        if buffered.len() > limit {
            let head = buffered.freeze();
            let replay = stream::once(async move { Ok::<_, axum::Error>(head) })
                .chain(body.into_data_stream());
            return Buffered::Oversized(Body::from_stream(replay));
        }
    }
    Buffered::Complete(buffered.freeze())
}

/// Write the page field, refresh the namespace expiry, and track comment variants.
async fn write_page(
    cache: &CacheState,
    ctx: &RequestContext,
    keys: &KeyBuilder,
    body: Bytes,
) -> bool {
    let store = cache.store.as_ref();
    let expire_at = expiry_timestamp(cache.config.ttl);
    let namespace = keys.build(&Namespace::for_page(ctx.classification.page_type));

    if let Err(err) = store.hset(namespace.as_str(), ctx.path.as_str(), body).await {
        record_store_error("hset", &err);
        return false;
    }
    if let Err(err) = store.expire_at(namespace.as_str(), expire_at).await {
        record_store_error("expire_at", &err);
    }

    if ctx.classification.comment_page {
        let set = keys.comment_set(&ctx.classification.primary);
        if let Err(err) = store.sadd(set.as_str(), ctx.path.as_str()).await {
            record_store_error("sadd", &err);
        } else if let Err(err) = store.expire_at(set.as_str(), expire_at).await {
            record_store_error("expire_at", &err);
        }
    }
    true
}

fn expiry_timestamp(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    OffsetDateTime::now_utc().unix_timestamp().saturating_add(ttl)
}

pub fn debug_comment(site_name: &str, message: &str, elapsed: Duration) -> String {
    format!(
        "<!-- {site_name} Cache: [ {message}: {:.5} ] -->",
        elapsed.as_secs_f64()
    )
}

/// Append the diagnostic comment to HTML bodies.
async fn annotate(response: Response, site_name: &str, message: &str, elapsed: Duration) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("text/html"));
    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "Failed to buffer body for diagnostic comment");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let comment = debug_comment(site_name, message, elapsed);
    let mut annotated = Vec::with_capacity(bytes.len() + comment.len());
    annotated.extend_from_slice(&bytes);
    annotated.extend_from_slice(comment.as_bytes());

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(annotated))
}
