use access_service::{
    build_router,
    config::{AccessConfig, PersistenceBackend, RateLimitBackend},
    db,
    services::{
        metrics::init_metrics, AccessLogSink, AssetCatalog, Database, InMemoryStore,
        LocalCounterStore, RateLimitStore, RedisCounterStore, TokenStore,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting access service"
    );

    let (tokens, logs, assets): (
        Arc<dyn TokenStore>,
        Arc<dyn AccessLogSink>,
        Arc<dyn AssetCatalog>,
    ) = match config.persistence {
        PersistenceBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            let database = Arc::new(Database::new(pool));
            let tokens: Arc<dyn TokenStore> = database.clone();
            let logs: Arc<dyn AccessLogSink> = database.clone();
            let assets: Arc<dyn AssetCatalog> = database;
            (tokens, logs, assets)
        }
        PersistenceBackend::Memory => {
            tracing::warn!("Using in-memory stores; tokens and audit logs are lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let tokens: Arc<dyn TokenStore> = store.clone();
            let logs: Arc<dyn AccessLogSink> = store.clone();
            let assets: Arc<dyn AssetCatalog> = store;
            (tokens, logs, assets)
        }
    };

    let shutdown = CancellationToken::new();

    let counters: Arc<dyn RateLimitStore> = match config.rate_limit.backend {
        RateLimitBackend::Redis => {
            let url = config.redis.url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("REDIS_URL is required for redis backend"))
            })?;
            let store = RedisCounterStore::new(url)
                .await
                .map_err(AppError::InternalError)?;
            store.health_check().await.map_err(AppError::InternalError)?;
            Arc::new(store)
        }
        RateLimitBackend::Local => {
            let store = Arc::new(LocalCounterStore::new());
            let shortest_window = [
                config.rate_limit.gallery,
                config.rate_limit.signed_url,
                config.rate_limit.checkout,
                config.rate_limit.webhook,
            ]
            .iter()
            .map(|quota| quota.window())
            .min()
            .unwrap_or(Duration::from_secs(60));
            spawn_counter_cleanup(store.clone(), shortest_window, shutdown.clone());
            store
        }
    };
    tracing::info!(backend = ?config.rate_limit.backend, "Rate limiter initialized");

    let state = AppState::new(config.clone(), tokens, logs, assets, counters);
    let audit = state.audit.clone();

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    tracing::info!(pending = audit.pending(), "Flushing access logs");
    audit.flush().await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Periodically drop expired windows from the in-process counter store.
fn spawn_counter_cleanup(
    store: Arc<LocalCounterStore>,
    every: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = store.cleanup();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = store.len(), "Rate limit windows cleaned up");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
