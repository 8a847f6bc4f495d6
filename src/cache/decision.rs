//! Decision engine.
//!
//! [`evaluate`] performs the store round-trips a request needs and records their
//! outcomes as [`Predicates`]; [`select`] then picks exactly one [`Action`] from them
//! without further I/O. Any store failure during evaluation selects a bypass.

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::context::{BypassReason, RequestContext};
use super::keys::Namespace;
use super::store::{KvStore, StoreError};
use crate::util::bytes::format_bytes;

const METRIC_STORE_ERROR: &str = "redpage_cache_store_error_total";

/// Outcome of the memory-ceiling check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCheck {
    /// No ceiling configured, or not evaluated for this request.
    NotChecked,
    Within,
    Exceeded,
    Failed,
}

/// Outcome of the page lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// An earlier predicate already decided the action.
    Skipped,
    Miss,
    Hit(Bytes),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicates {
    pub memory: MemoryCheck,
    pub lookup: Lookup,
    pub operator: bool,
    pub delete_domain: bool,
    pub delete_page: bool,
    pub bypass: Option<BypassReason>,
}

impl Predicates {
    fn store_failed(&self) -> bool {
        self.memory == MemoryCheck::Failed || self.lookup == Lookup::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DeleteDomain { forced: bool },
    DeletePage,
    Bypass(BypassReason),
    CacheHit(Bytes),
    RenderAndStore,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::DeleteDomain { .. } => "delete_domain",
            Action::DeletePage => "delete_page",
            Action::Bypass(_) => "bypass",
            Action::CacheHit(_) => "cache_hit",
            Action::RenderAndStore => "render_and_store",
        }
    }
}

/// Pick the single action for a request. Priority: store failure, domain delete,
/// page delete, bypass, hit, render.
pub fn select(predicates: &Predicates) -> Action {
    if predicates.store_failed() {
        return Action::Bypass(BypassReason::StoreUnavailable);
    }
    if predicates.bypass == Some(BypassReason::NoHost) {
        return Action::Bypass(BypassReason::NoHost);
    }
    if predicates.memory == MemoryCheck::Exceeded {
        return Action::DeleteDomain { forced: true };
    }
    if predicates.operator && predicates.delete_domain {
        return Action::DeleteDomain { forced: false };
    }
    if predicates.operator && predicates.delete_page {
        return Action::DeletePage;
    }
    if let Some(reason) = predicates.bypass {
        return Action::Bypass(reason);
    }
    match &predicates.lookup {
        Lookup::Hit(body) => Action::CacheHit(body.clone()),
        _ => Action::RenderAndStore,
    }
}

/// Compute predicates for `ctx`, touching the store only as far as needed.
pub async fn evaluate(ctx: &RequestContext, store: &dyn KvStore, config: &CacheConfig) -> Predicates {
    let mut predicates = Predicates {
        memory: MemoryCheck::NotChecked,
        lookup: Lookup::Skipped,
        operator: ctx.operator,
        delete_domain: ctx.directives.delete_domain,
        delete_page: ctx.directives.delete_page,
        bypass: ctx.bypass_reason(),
    };

    let Some(keys) = ctx.keys() else {
        return predicates;
    };

    if let Some(limit) = config.memory_limit {
        predicates.memory = match store.info().await {
            Ok(info) => match info.used_memory {
                Some(used) if used > limit => {
                    debug!(
                        used = %format_bytes(used),
                        limit = %format_bytes(limit),
                        "Store memory above ceiling"
                    );
                    MemoryCheck::Exceeded
                }
                _ => MemoryCheck::Within,
            },
            Err(err) => {
                record_store_error("info", &err);
                MemoryCheck::Failed
            }
        };
        if predicates.memory != MemoryCheck::Within {
            return predicates;
        }
    }

    let directive_pending =
        predicates.operator && (predicates.delete_domain || predicates.delete_page);
    if directive_pending || predicates.bypass.is_some() {
        return predicates;
    }

    let namespace = Namespace::for_page(ctx.classification.page_type);
    predicates.lookup = match store
        .hget(keys.build(&namespace).as_str(), ctx.path.as_str())
        .await
    {
        Ok(Some(body)) => Lookup::Hit(body),
        Ok(None) => Lookup::Miss,
        Err(err) => {
            record_store_error("hget", &err);
            Lookup::Failed
        }
    };
    predicates
}

pub(crate) fn record_store_error(op: &'static str, err: &StoreError) {
    warn!(op, error = %err, "Cache store operation failed; failing open");
    counter!(METRIC_STORE_ERROR, "op" => op).increment(1);
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, Method, Uri, header};

    use super::*;
    use crate::cache::store::MemoryStore;

    fn base() -> Predicates {
        Predicates {
            memory: MemoryCheck::Within,
            lookup: Lookup::Miss,
            operator: false,
            delete_domain: false,
            delete_page: false,
            bypass: None,
        }
    }

    #[test]
    fn memory_ceiling_beats_everything_but_store_failure() {
        let predicates = Predicates {
            memory: MemoryCheck::Exceeded,
            bypass: Some(BypassReason::Operator),
            operator: true,
            delete_page: true,
            lookup: Lookup::Skipped,
            ..base()
        };
        assert_eq!(select(&predicates), Action::DeleteDomain { forced: true });

        let failed = Predicates {
            memory: MemoryCheck::Failed,
            ..predicates
        };
        assert_eq!(
            select(&failed),
            Action::Bypass(BypassReason::StoreUnavailable)
        );
    }

    #[test]
    fn operator_directives() {
        let both = Predicates {
            operator: true,
            delete_domain: true,
            delete_page: true,
            bypass: Some(BypassReason::Operator),
            ..base()
        };
        assert_eq!(select(&both), Action::DeleteDomain { forced: false });

        let page = Predicates {
            delete_domain: false,
            ..both.clone()
        };
        assert_eq!(select(&page), Action::DeletePage);

        let visitor = Predicates {
            operator: false,
            bypass: None,
            ..both
        };
        assert_eq!(select(&visitor), Action::RenderAndStore);
    }

    #[test]
    fn bypass_precedes_hit() {
        let predicates = Predicates {
            bypass: Some(BypassReason::Feed),
            lookup: Lookup::Hit(Bytes::from_static(b"x")),
            ..base()
        };
        assert_eq!(select(&predicates), Action::Bypass(BypassReason::Feed));
    }

    #[test]
    fn hit_and_miss() {
        let hit = Predicates {
            lookup: Lookup::Hit(Bytes::from_static(b"page")),
            ..base()
        };
        assert_eq!(select(&hit), Action::CacheHit(Bytes::from_static(b"page")));
        assert_eq!(select(&base()), Action::RenderAndStore);
        assert_eq!(
            select(&Predicates {
                lookup: Lookup::Failed,
                ..base()
            }),
            Action::Bypass(BypassReason::StoreUnavailable)
        );
    }

    fn ctx(uri: &str, cookie: Option<&str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));
        if let Some(cookie) = cookie {
            headers.insert(header::COOKIE, HeaderValue::from_str(cookie).expect("cookie"));
        }
        let uri: Uri = uri.parse().expect("uri");
        RequestContext::new(&Method::GET, &uri, &headers, &CacheConfig::default())
    }

    #[tokio::test]
    async fn evaluate_reads_the_page_hash() {
        let store = MemoryStore::new();
        store
            .hset("example.com:single", "/a/", Bytes::from_static(b"cached"))
            .await
            .expect("seed");

        let predicates = evaluate(&ctx("/A/?x=1", None), &store, &CacheConfig::default()).await;
        assert_eq!(predicates.lookup, Lookup::Hit(Bytes::from_static(b"cached")));
        assert_eq!(predicates.memory, MemoryCheck::NotChecked);
    }

    #[tokio::test]
    async fn evaluate_skips_lookup_when_bypassing() {
        let store = MemoryStore::new();
        let predicates = evaluate(
            &ctx("/a/", Some("wordpress_logged_in_x=1")),
            &store,
            &CacheConfig::default(),
        )
        .await;
        assert_eq!(predicates.lookup, Lookup::Skipped);
        assert_eq!(predicates.bypass, Some(BypassReason::Operator));
    }

    #[tokio::test]
    async fn unknown_memory_usage_is_not_a_breach() {
        let store = MemoryStore::new();
        store.pin_used_memory(None);
        let config = CacheConfig {
            memory_limit: Some(1),
            ..Default::default()
        };

        let predicates = evaluate(&ctx("/a/", None), &store, &config).await;
        assert_eq!(predicates.memory, MemoryCheck::Within);
        assert_eq!(select(&predicates), Action::RenderAndStore);
    }

    #[tokio::test]
    async fn breach_forces_domain_delete_for_operators_too() {
        let store = MemoryStore::new();
        store.pin_used_memory(Some(2048));
        let config = CacheConfig {
            memory_limit: Some(1024),
            ..Default::default()
        };

        let predicates = evaluate(
            &ctx("/a/", Some("wordpress_logged_in_x=1")),
            &store,
            &config,
        )
        .await;
        assert_eq!(select(&predicates), Action::DeleteDomain { forced: true });
    }
}
