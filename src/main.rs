use std::{future::IntoFuture, process, sync::Arc};

use redpage::{
    application::{error::AppError, repos::ContentSource},
    cache::{
        CacheConfig, CacheConsumer, CacheState, CacheTrigger, Cascade, CascadePlan,
        EventQueue, InvalidationStep, KeyBuilder, KvStore, MemoryStore, context::canonical_domain,
    },
    config::{self, StoreBackend},
    infra::{
        db::PgContentSource,
        error::InfraError,
        http::{self, AdminState, OriginProxy},
        redis::RedisStore,
        telemetry,
    },
    util::bytes::format_bytes,
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::RebuildPositions(_) => run_rebuild_positions(settings).await,
        config::Command::Flush(args) => run_flush(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let content = match init_content(&settings).await {
        Ok(content) => content,
        Err(err) => {
            warn!(
                error = %err,
                "Content database unavailable; position index will be cleared instead of rebuilt"
            );
            None
        }
    };
    let cache_config = CacheConfig::from(&settings);

    let queue = Arc::new(EventQueue::new());
    let cascade = Arc::new(Cascade::new(
        store.clone(),
        KeyBuilder::new(&cache_config.site_domain),
        content.clone(),
        cache_config.excluded_categories.clone(),
        cache_config.page_size(),
    ));
    let consumer = Arc::new(CacheConsumer::new(
        cache_config.clone(),
        queue.clone(),
        cascade,
        content.clone(),
    ));
    let trigger = Arc::new(CacheTrigger::new(
        cache_config.clone(),
        queue,
        consumer.clone(),
    ));

    let consume_handle = match cache_config.auto_consume_interval() {
        Some(period) if cache_config.enabled => Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                consumer.consume().await;
            }
        })),
        _ => None,
    };

    info!(
        site = %cache_config.site_name,
        domain = %cache_config.site_domain,
        enabled = cache_config.enabled,
        memory_limit = %cache_config
            .memory_limit
            .map_or_else(|| "none".to_string(), format_bytes),
        max_body = %format_bytes(cache_config.max_body_bytes as u64),
        content_source = content.is_some(),
        "Page cache ready"
    );

    let cache_state = CacheState::new(cache_config, store, content);
    let admin_state = AdminState {
        trigger,
        token: settings.events.token.as_deref().map(Arc::from),
    };
    if admin_state.token.is_none() {
        warn!("events.token is not set; the event webhook is disabled");
    }

    let result = serve_http(&settings, cache_state, admin_state).await;

    if let Some(handle) = consume_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_rebuild_positions(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let content = init_content(&settings)
        .await?
        .ok_or_else(|| AppError::validation("rebuild-positions requires database.url"))?;
    let cache_config = CacheConfig::from(&settings);

    let cascade = Cascade::new(
        store,
        KeyBuilder::new(&cache_config.site_domain),
        Some(content),
        cache_config.excluded_categories.clone(),
        cache_config.page_size(),
    );
    let mut plan = CascadePlan::new();
    plan.push(InvalidationStep::RebuildPositionIndex);

    let report = cascade.run(&plan).await.map_err(cascade_error)?;
    info!(
        target = "redpage::rebuild_positions",
        domain = %cache_config.site_domain,
        ranked = report.ranked.unwrap_or_default(),
        "Position index rebuilt"
    );
    Ok(())
}

async fn run_flush(settings: config::Settings, args: config::FlushArgs) -> Result<(), AppError> {
    let domain = match args.domain.as_deref() {
        Some(raw) => canonical_domain(raw)
            .ok_or_else(|| AppError::validation(format!("`{raw}` is not a usable domain")))?,
        None => settings.site.domain.clone(),
    };
    let store = init_store(&settings).await?;
    let content = match init_content(&settings).await {
        Ok(content) => content,
        Err(err) => {
            warn!(error = %err, "Content database unavailable; position index will not be rebuilt");
            None
        }
    };
    let cache_config = CacheConfig::from(&settings);

    let cascade = Cascade::new(
        store,
        KeyBuilder::new(&domain),
        content,
        cache_config.excluded_categories.clone(),
        cache_config.page_size(),
    );
    let report = cascade
        .run(&cascade.flush_plan())
        .await
        .map_err(cascade_error)?;
    info!(
        target = "redpage::flush",
        domain = %domain,
        keys_deleted = report.keys_deleted,
        ranked = report.ranked.unwrap_or_default(),
        "Domain cache flushed"
    );
    Ok(())
}

fn cascade_error(err: redpage::cache::CascadeError) -> AppError {
    match err {
        redpage::cache::CascadeError::Store(err) => AppError::from(InfraError::from(err)),
        redpage::cache::CascadeError::Content(err) => AppError::from(InfraError::from(err)),
    }
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn KvStore>, AppError> {
    match settings.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::open(&settings.store.url)
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            if let Err(err) = store.connect().await {
                warn!(error = %err, "Redis unreachable; requests bypass the cache until it is back");
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            info!("Using the in-process store; cached pages are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn init_content(
    settings: &config::Settings,
) -> Result<Option<Arc<dyn ContentSource>>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        return Ok(None);
    };

    let pool = PgContentSource::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    let source = PgContentSource::new(pool);
    source
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("Connected to content database");
    Ok(Some(Arc::new(source)))
}

async fn serve_http(
    settings: &config::Settings,
    cache_state: CacheState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let origin = OriginProxy::new(&settings.origin)
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;
    let public_router = http::build_public_router(http::origin_router(origin), Some(cache_state));
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        origin = %settings.origin.url,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => warn!(error = %err, "Cannot listen for shutdown signal"),
        }
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()))
        .into_future();
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()))
        .into_future();

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        shutdown_requested(shutdown_rx).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = deadline => {
            warn!(grace_seconds = grace.as_secs(), "Graceful shutdown timed out");
        }
    }

    Ok(())
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
