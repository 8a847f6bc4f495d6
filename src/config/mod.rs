//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    BackendOverrides, CliArgs, Command, FlushArgs, MaintenanceArgs, ServeArgs, ServeOverrides,
};

use crate::util::bytes::parse_size;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "redpage";
const ENV_PREFIX: &str = "REDPAGE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_ADMIN_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_ORIGIN_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SITE_NAME: &str = "redpage";
const DEFAULT_SITE_DOMAIN: &str = "localhost";
const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
const DEFAULT_PAGE_SIZE: u64 = 10;
const DEFAULT_PERMALINK_PATTERN: &str = "/{slug}/";
const DEFAULT_DELETE_PAGE_PARAM: &str = "delete-page-cache";
const DEFAULT_DELETE_DOMAIN_PARAM: &str = "delete-domain-cache";
const DEFAULT_SEARCH_PARAM: &str = "s";
const DEFAULT_REPLY_PARAM: &str = "replytocom";
const DEFAULT_OPERATOR_COOKIE: &str = "wordpress_logged_in";
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub database: DatabaseSettings,
    pub origin: OriginSettings,
    pub site: SiteSettings,
    pub cache: CacheSettings,
    pub events: EventSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: String,
    /// Memory ceiling in bytes; `None` disables the forced flush.
    pub memory_limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub url: Url,
    pub timeout: Duration,
    pub preserve_host: bool,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_seconds: NonZeroU64,
    pub debug_comment: bool,
    pub max_body_bytes: NonZeroU64,
    pub page_size: NonZeroU64,
    pub excluded_categories: Vec<i64>,
    pub permalink_pattern: String,
    pub delete_page_param: String,
    pub delete_domain_param: String,
    pub search_param: String,
    pub reply_param: String,
    pub operator_cookie: String,
    pub auto_consume_interval_ms: u64,
    pub consume_batch_limit: usize,
    pub max_attempts: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct EventSettings {
    /// Bearer token guarding the event webhook; `None` disables it.
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.excluded_categories")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::RebuildPositions(args)) => raw.apply_backend_overrides(&args.backends),
        Some(Command::Flush(args)) => raw.apply_backend_overrides(&args.backends),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    database: RawDatabaseSettings,
    origin: RawOriginSettings,
    site: RawSiteSettings,
    cache: RawCacheSettings,
    events: RawEventSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.origin_url.as_ref() {
            self.origin.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.debug_comment {
            self.cache.debug_comment = Some(enabled);
        }

        self.apply_backend_overrides(&overrides.backends);
    }

    fn apply_backend_overrides(&mut self, overrides: &BackendOverrides) {
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            database,
            origin,
            site,
            cache,
            events,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            database: build_database_settings(database)?,
            origin: build_origin_settings(origin)?,
            site: build_site_settings(site)?,
            cache: build_cache_settings(cache)?,
            events: build_event_settings(events),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match non_blank(store.backend).as_deref() {
        None | Some("redis") => StoreBackend::Redis,
        Some("memory") => StoreBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "store.backend",
                format!("unknown backend `{other}` (expected `redis` or `memory`)"),
            ));
        }
    };

    let url = non_blank(store.url).unwrap_or_else(|| DEFAULT_STORE_URL.to_string());
    if backend == StoreBackend::Redis {
        Url::parse(&url)
            .map_err(|err| LoadError::invalid("store.url", format!("invalid url: {err}")))?;
    }

    let memory_limit = match non_blank(store.memory_limit) {
        Some(value) => {
            let bytes = parse_size(&value)
                .map_err(|err| LoadError::invalid("store.memory_limit", err.to_string()))?;
            (bytes > 0).then_some(bytes)
        }
        None => None,
    };

    Ok(StoreSettings {
        backend,
        url,
        memory_limit,
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections,
    })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let raw_url = non_blank(origin.url).unwrap_or_else(|| DEFAULT_ORIGIN_URL.to_string());
    let url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("origin.url", format!("invalid url: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "origin.url",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = origin
        .timeout_seconds
        .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(OriginSettings {
        url,
        timeout: Duration::from_secs(timeout_secs),
        preserve_host: origin.preserve_host.unwrap_or(true),
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let domain = non_blank(site.domain)
        .unwrap_or_else(|| DEFAULT_SITE_DOMAIN.to_string())
        .to_ascii_lowercase();
    let domain = domain
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(domain);
    if domain.is_empty() {
        return Err(LoadError::invalid("site.domain", "must not be empty"));
    }

    Ok(SiteSettings {
        name: non_blank(site.name).unwrap_or_else(|| DEFAULT_SITE_NAME.to_string()),
        domain,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = NonZeroU64::new(cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECS))
        .ok_or_else(|| LoadError::invalid("cache.ttl_seconds", "must be greater than zero"))?;

    let max_body_bytes = match non_blank(cache.max_body_bytes) {
        Some(value) => parse_size(&value)
            .map_err(|err| LoadError::invalid("cache.max_body_bytes", err.to_string()))?,
        None => DEFAULT_MAX_BODY_BYTES,
    };
    let max_body_bytes = NonZeroU64::new(max_body_bytes)
        .ok_or_else(|| LoadError::invalid("cache.max_body_bytes", "must be greater than zero"))?;
    usize::try_from(max_body_bytes.get()).map_err(|_| {
        LoadError::invalid(
            "cache.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let page_size = NonZeroU64::new(cache.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
        .ok_or_else(|| LoadError::invalid("cache.page_size", "must be greater than zero"))?;

    let mut excluded_categories = cache.excluded_categories.unwrap_or_default();
    excluded_categories.sort_unstable();
    excluded_categories.dedup();

    let delete_page_param = control_param(
        "cache.delete_page_param",
        cache.delete_page_param,
        DEFAULT_DELETE_PAGE_PARAM,
    )?;
    let delete_domain_param = control_param(
        "cache.delete_domain_param",
        cache.delete_domain_param,
        DEFAULT_DELETE_DOMAIN_PARAM,
    )?;
    let search_param = control_param(
        "cache.search_param",
        cache.search_param,
        DEFAULT_SEARCH_PARAM,
    )?;
    let reply_param = control_param("cache.reply_param", cache.reply_param, DEFAULT_REPLY_PARAM)?;
    if delete_page_param == delete_domain_param {
        return Err(LoadError::invalid(
            "cache.delete_domain_param",
            "must differ from cache.delete_page_param",
        ));
    }

    let consume_batch_limit = cache
        .consume_batch_limit
        .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT);
    if consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl_seconds,
        debug_comment: cache.debug_comment.unwrap_or(false),
        max_body_bytes,
        page_size,
        excluded_categories,
        permalink_pattern: non_blank(cache.permalink_pattern)
            .unwrap_or_else(|| DEFAULT_PERMALINK_PATTERN.to_string()),
        delete_page_param,
        delete_domain_param,
        search_param,
        reply_param,
        operator_cookie: non_blank(cache.operator_cookie)
            .unwrap_or_else(|| DEFAULT_OPERATOR_COOKIE.to_string()),
        auto_consume_interval_ms: cache
            .auto_consume_interval_ms
            .unwrap_or(DEFAULT_AUTO_CONSUME_INTERVAL_MS),
        consume_batch_limit,
        max_attempts: non_zero_u32(
            cache.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).into(),
            "cache.max_attempts",
        )?,
    })
}

fn build_event_settings(events: RawEventSettings) -> EventSettings {
    EventSettings {
        token: non_blank(events.token),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    url: Option<String>,
    memory_limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
    preserve_host: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    name: Option<String>,
    domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    debug_comment: Option<bool>,
    max_body_bytes: Option<String>,
    page_size: Option<u64>,
    excluded_categories: Option<Vec<i64>>,
    permalink_pattern: Option<String>,
    delete_page_param: Option<String>,
    delete_domain_param: Option<String>,
    search_param: Option<String>,
    reply_param: Option<String>,
    operator_cookie: Option<String>,
    auto_consume_interval_ms: Option<u64>,
    consume_batch_limit: Option<usize>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventSettings {
    token: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn control_param(
    key: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<String, LoadError> {
    let value = non_blank(value).unwrap_or_else(|| default.to_string());
    if value.contains(['&', '=', '?', '#']) {
        return Err(LoadError::invalid(
            key,
            "parameter names must not contain `&`, `=`, `?` or `#`",
        ));
    }
    Ok(value)
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
