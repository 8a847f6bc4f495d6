//! Immutable per-request view consumed by the decision engine.

use axum::http::{HeaderMap, Method, Uri, header};

use super::config::CacheConfig;
use super::keys::KeyBuilder;
use super::path::{Classification, PagePath, PageType, normalize};

/// Why a request is served by the origin without touching the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Not a GET request.
    Method,
    /// No usable `Host`.
    NoHost,
    /// Logged-in operator session.
    Operator,
    /// Search results.
    Search,
    /// Syndication feed.
    Feed,
    /// Reply-to-comment form.
    Reply,
    /// The store failed while evaluating the request.
    StoreUnavailable,
}

impl BypassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BypassReason::Method => "method",
            BypassReason::NoHost => "no_host",
            BypassReason::Operator => "operator",
            BypassReason::Search => "search",
            BypassReason::Feed => "feed",
            BypassReason::Reply => "reply",
            BypassReason::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Control parameters present in the query string. Values are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directives {
    pub delete_page: bool,
    pub delete_domain: bool,
    pub search: bool,
    pub reply: bool,
}

impl Directives {
    pub fn parse(query: Option<&str>, config: &CacheConfig) -> Self {
        let mut directives = Self::default();
        let Some(query) = query else {
            return directives;
        };

        let params = &config.params;
        for (name, _) in url::form_urlencoded::parse(query.as_bytes()) {
            if name == params.delete_page.as_str() {
                directives.delete_page = true;
            } else if name == params.delete_domain.as_str() {
                directives.delete_domain = true;
            } else if name == params.search.as_str() {
                directives.search = true;
            } else if name == params.reply.as_str() {
                directives.reply = true;
            }
        }
        directives
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Canonical site domain; `None` when the request carries no usable host.
    pub domain: Option<String>,
    pub method_cacheable: bool,
    pub operator: bool,
    pub directives: Directives,
    pub path: PagePath,
    pub classification: Classification,
}

impl RequestContext {
    /// Build the context once from the request head.
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap, config: &CacheConfig) -> Self {
        let path = normalize(uri.path(), uri.query(), &config.params);
        let classification = Classification::of(&path);

        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| uri.host());

        Self {
            domain: host.and_then(canonical_domain),
            method_cacheable: *method == Method::GET,
            operator: has_operator_cookie(headers, &config.operator_cookie),
            directives: Directives::parse(uri.query(), config),
            path,
            classification,
        }
    }

    pub fn keys(&self) -> Option<KeyBuilder> {
        self.domain.as_deref().map(KeyBuilder::new)
    }

    /// First reason, if any, to leave the cache alone entirely.
    pub fn bypass_reason(&self) -> Option<BypassReason> {
        if self.domain.is_none() {
            Some(BypassReason::NoHost)
        } else if !self.method_cacheable {
            Some(BypassReason::Method)
        } else if self.operator {
            Some(BypassReason::Operator)
        } else if self.directives.search {
            Some(BypassReason::Search)
        } else if self.classification.page_type == PageType::Feed {
            Some(BypassReason::Feed)
        } else if self.directives.reply {
            Some(BypassReason::Reply)
        } else {
            None
        }
    }
}

/// Lower-case host without port and without a leading `www.`.
pub fn canonical_domain(host: &str) -> Option<String> {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };

    let lowered = without_port.trim_end_matches('.').to_ascii_lowercase();
    let domain = lowered.strip_prefix("www.").unwrap_or(&lowered);
    (!domain.is_empty()).then(|| domain.to_string())
}

fn has_operator_cookie(headers: &HeaderMap, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.split('=').next())
        .any(|name| name.trim().starts_with(prefix))
}
