mod config;
mod db;
mod errors;
mod gmail;
mod integrations;
mod llm_client;
mod models;
mod rate_limit;
mod routes;
mod scan;
mod scheduler;
mod security_headers;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, RateLimitBackend};
use crate::db::create_pool;
use crate::gmail::GmailClient;
use crate::integrations::repository::PgScanStore;
use crate::llm_client::LlmClient;
use crate::rate_limit::{spawn_sweeper, RateLimitConfig, RateLimiter, RedisStore};
use crate::routes::build_router;
use crate::scan::EmailScanWorkflow;
use crate::scheduler::{ScanScheduler, SystemClock};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Zume API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize Redis, only needed by the shared rate limit backend
    let redis = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Redis client initialized");
            Some(client)
        }
        None => None,
    };

    // Initialize external clients
    let gmail = GmailClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.google_redirect_uri.clone(),
    )?;
    let llm = LlmClient::new(config.gemini_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    // Scan workflow and scheduler
    let store = Arc::new(PgScanStore::new(db.clone()));
    let workflow = Arc::new(EmailScanWorkflow::new(
        store.clone(),
        Arc::new(gmail.clone()),
        Arc::new(llm),
        config.frontend_url.clone(),
        config.scan_max_results,
    ));
    let scheduler = ScanScheduler::new(store, workflow, Arc::new(SystemClock));
    match scheduler.rebuild_all().await {
        Ok(count) => info!("Registered {count} scheduled scan(s)"),
        Err(e) => error!("Failed to load scheduled scans: {e:#}"),
    }
    scheduler.start();

    // Rate limiter
    let limits = RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window_seconds: config.rate_limit_window_secs,
    };
    let limiter = match (config.rate_limit_backend, redis) {
        (RateLimitBackend::Redis, Some(client)) => {
            Arc::new(RateLimiter::new(limits, Arc::new(RedisStore::new(client))))
        }
        _ => {
            let limiter = Arc::new(RateLimiter::in_memory(limits));
            spawn_sweeper(
                limiter.clone(),
                Duration::from_secs(config.rate_limit_sweep_secs),
            );
            limiter
        }
    };
    info!(
        "Rate limiting: {} requests per {}s ({:?} backend)",
        limiter.config().max_requests,
        limiter.config().window_seconds,
        config.rate_limit_backend
    );

    // Build app state
    let state = AppState {
        db,
        gmail,
        scheduler: scheduler.clone(),
    };

    // Build router
    let app = build_router(state, limiter)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict CORS to FRONTEND_URL

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.stop();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
