//! Runtime cache configuration.
//!
//! Built once from the layered [`Settings`](crate::config::Settings) and shared by the
//! request layer, the cascades and the event consumer.

use std::time::Duration;

use crate::domain::entities::CategoryId;
use crate::domain::permalink::Permalinks;

const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_PAGE_SIZE: u64 = 10;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Query parameter names with special meaning to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlParams {
    pub delete_page: String,
    pub delete_domain: String,
    pub search: String,
    pub reply: String,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            delete_page: "delete-page-cache".to_string(),
            delete_domain: "delete-domain-cache".to_string(),
            search: "s".to_string(),
            reply: "replytocom".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; when off every request passes straight to the origin.
    pub enabled: bool,
    /// Site name shown in the diagnostic comment.
    pub site_name: String,
    /// Domain whose keys content events invalidate.
    pub site_domain: String,
    /// Expiry applied to a namespace on every write.
    pub ttl: Duration,
    pub debug_comment: bool,
    pub max_body_bytes: usize,
    /// Store memory ceiling in bytes.
    pub memory_limit: Option<u64>,
    pub page_size: u64,
    pub excluded_categories: Vec<CategoryId>,
    pub permalinks: Permalinks,
    pub params: ControlParams,
    /// Cookie-name prefix identifying an operator session.
    pub operator_cookie: String,
    pub auto_consume_interval_ms: u64,
    pub consume_batch_limit: usize,
    /// Cascade attempts per event before it is dropped.
    pub max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            site_name: "redpage".to_string(),
            site_domain: "localhost".to_string(),
            ttl: DEFAULT_TTL,
            debug_comment: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            memory_limit: None,
            page_size: DEFAULT_PAGE_SIZE,
            excluded_categories: Vec::new(),
            permalinks: Permalinks::default(),
            params: ControlParams::default(),
            operator_cookie: "wordpress_logged_in".to_string(),
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let cache = &settings.cache;
        Self {
            enabled: cache.enabled,
            site_name: settings.site.name.clone(),
            site_domain: settings.site.domain.clone(),
            ttl: Duration::from_secs(cache.ttl_seconds.get()),
            debug_comment: cache.debug_comment,
            max_body_bytes: usize::try_from(cache.max_body_bytes.get()).unwrap_or(usize::MAX),
            memory_limit: settings.store.memory_limit,
            page_size: cache.page_size.get(),
            excluded_categories: cache.excluded_categories.clone(),
            permalinks: Permalinks::new(cache.permalink_pattern.clone()),
            params: ControlParams {
                delete_page: cache.delete_page_param.clone(),
                delete_domain: cache.delete_domain_param.clone(),
                search: cache.search_param.clone(),
                reply: cache.reply_param.clone(),
            },
            operator_cookie: cache.operator_cookie.clone(),
            auto_consume_interval_ms: cache.auto_consume_interval_ms,
            consume_batch_limit: cache.consume_batch_limit,
            max_attempts: cache.max_attempts.get(),
        }
    }
}

impl CacheConfig {
    /// Page size clamped to at least one.
    pub fn page_size(&self) -> u64 {
        self.page_size.max(1)
    }

    /// Attempts clamped to at least one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Background consumption cadence; `None` when disabled.
    pub fn auto_consume_interval(&self) -> Option<Duration> {
        (self.auto_consume_interval_ms > 0)
            .then(|| Duration::from_millis(self.auto_consume_interval_ms))
    }
}
