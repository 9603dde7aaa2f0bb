//! StreamHub server: live viewership for a streaming platform
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use streamhub_cache::{LiveBackend, LiveStateCache, PresenceLedger};
use streamhub_core::config::AppConfig;
use streamhub_core::error::AppError;
use streamhub_core::traits::LiveStore;
use streamhub_database::{DurableStore, PgDurableStore};
use streamhub_external::{HttpStreamingClient, StreamingService};
use streamhub_realtime::PresenceEngine;
use streamhub_worker::{
    CategoryLeaderboardAggregator, CronRefreshTasks, PollLock, PollScheduler,
    PresenceRefreshListener, RefreshJob, RefreshRegistry, StreamLifecycle, WorkerRunner,
};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "streamhub-server", version, about = "StreamHub live viewership server")]
struct Cli {
    /// Configuration overlay to load from `config/{env}.toml`.
    #[arg(long, default_value = "development")]
    config_env: String,

    /// Instance identifier; overrides `instance.id`.
    #[arg(long)]
    instance_id: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(&cli.config_env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if cli.instance_id.is_some() {
        config.instance.id = cli.instance_id;
    }

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// State of the health endpoint.
#[derive(Debug, Clone)]
struct HealthState {
    store: Arc<dyn LiveStore>,
    durable: Arc<dyn DurableStore>,
}

/// GET /health
async fn health(State(state): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let store = state.store.health_check().await.unwrap_or(false);
    let database = state.durable.health_check().await.unwrap_or(false);
    let status = if store && database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "store": store,
            "database": database,
        })),
    )
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    let instance_id = config.instance.resolve_id();
    tracing::info!(
        "Starting StreamHub v{} (instance '{}')",
        env!("CARGO_PKG_VERSION"),
        instance_id
    );

    // ── Step 1: Live-state store and notification bus ────────────
    tracing::info!(
        "Initializing live-state backend (provider: {})...",
        config.cache.provider
    );
    let backend = LiveBackend::connect(&config.cache).await?;

    // ── Step 2: Database connection + migrations ─────────────────
    let pg = PgDurableStore::connect(&config.database, &instance_id).await?;
    let durable: Arc<dyn DurableStore> = Arc::new(pg.clone());

    // ── Step 3: Upstream streaming service ───────────────────────
    let external: Arc<dyn StreamingService> = Arc::new(HttpStreamingClient::new(&config.external)?);

    // ── Step 4: Live-state cache and presence ledger ─────────────
    let cache = LiveStateCache::new(Arc::clone(&backend.store));
    let ledger = PresenceLedger::new(
        Arc::clone(&backend.store),
        Duration::from_secs(config.presence.tally_ttl_seconds),
    );
    let policy = config.viewers.merge_policy;
    tracing::info!("Viewer merge policy: {:?}", policy);

    // ── Step 5: Worker ───────────────────────────────────────────
    let lifecycle = StreamLifecycle::new(cache.clone(), Arc::clone(&durable));
    let refresh_job = Arc::new(RefreshJob::new(
        Arc::clone(&external),
        lifecycle.clone(),
        ledger.clone(),
        policy,
    ));
    let tasks = CronRefreshTasks::new(
        refresh_job,
        Arc::clone(&backend.store),
        &instance_id,
        Duration::from_secs(config.scheduler.refresh_interval_seconds.max(1)),
    )
    .await?;
    let registry: Arc<dyn RefreshRegistry> = Arc::new(tasks.clone());

    let scheduler = PollScheduler::new(
        PollLock::new(
            Arc::clone(&backend.store),
            instance_id.clone(),
            Duration::from_secs(config.scheduler.lock_ttl_seconds.max(1)),
        ),
        external,
        lifecycle,
        Arc::clone(&registry),
        config.external.page_size,
        config.scheduler.restore_page_size as usize,
    );
    let aggregator = CategoryLeaderboardAggregator::new(
        cache.clone(),
        Arc::clone(&durable),
        config.aggregator.top_n as usize,
    );
    let listener = PresenceRefreshListener::new(
        Arc::clone(&backend.bus),
        cache,
        ledger.clone(),
        registry,
        policy,
    );
    let worker = WorkerRunner::new(
        scheduler,
        tasks,
        aggregator,
        listener,
        config.scheduler.clone(),
        config.aggregator.clone(),
        instance_id.clone(),
    );

    // ── Step 6: Presence engine ──────────────────────────────────
    let presence = PresenceEngine::new(
        config.presence.clone(),
        ledger,
        Arc::clone(&backend.bus),
        instance_id.clone(),
    );

    // ── Step 7: Shutdown channel and background tasks ────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_cancel = shutdown_rx.clone();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_cancel).await {
            tracing::error!("Worker failed: {}", e);
        }
    });

    let publisher_engine = presence.clone();
    let publisher_cancel = shutdown_rx.clone();
    let publisher_handle = tokio::spawn(async move {
        publisher_engine.run_publisher(publisher_cancel).await;
    });

    // ── Step 8: Build and start HTTP server ──────────────────────
    let app = streamhub_realtime::ws::router(presence.clone())
        .merge(
            Router::new()
                .route("/health", get(health))
                .with_state(HealthState {
                    store: Arc::clone(&backend.store),
                    durable,
                }),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("StreamHub server listening on {}", addr);

    // ── Step 9: Graceful shutdown ────────────────────────────────
    let shutdown_presence = presence.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        let _ = shutdown_tx.send(true);
        if let Err(e) = shutdown_presence.shutdown().await {
            tracing::warn!("Presence engine shutdown failed: {}", e);
        }
    });

    server
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    // ── Step 10: Wait for background tasks ───────────────────────
    tracing::info!("Waiting for background tasks to complete...");

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let _ = tokio::time::timeout(grace, worker_handle).await;
    let _ = tokio::time::timeout(grace, publisher_handle).await;
    pg.close().await;

    tracing::info!("StreamHub server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
