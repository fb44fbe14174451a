#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use sea_orm::ConnectOptions;
use seqalloc::{Allocator, DatabaseSequenceStore, LocalSequenceCache, RedisSequenceCache};
use server::config::{CliArgs, ServerConfig};
use server::handler::{AppState, router};
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let mut db_opts = ConnectOptions::new(config.database_url.clone());
    db_opts
        .max_connections(config.database_max_connections)
        .sqlx_logging(false);
    let store =
        DatabaseSequenceStore::connect_with(db_opts, &config.counter_name, config.counter_start)
            .await?;
    let shared = RedisSequenceCache::connect(&config.redis_url, config.redis_keys.clone())?
        .with_connect_timeout(config.redis_connect_timeout);
    let local = LocalSequenceCache::new(config.local_capacity).with_op_timeout(config.local_op_timeout);

    let allocator = Arc::new(Allocator::new(store, shared, local, config.allocator).await);

    let shutdown = CancellationToken::new();
    let maintenance = allocator.spawn_maintenance(config.maintenance_interval, shutdown.clone());

    let app = router(AppState {
        allocator: Arc::clone(&allocator),
        request_timeout: config.request_timeout,
    });

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config, allocator.is_shared_available());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = maintenance.await {
        tracing::error!("maintenance task panicked: {e:?}");
    }

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig, shared_available: bool) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting sequence service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            addr = %config.server_addr,
            counter = %config.counter_name,
            shared_available,
            "Starting sequence service"
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM, then cancels `shutdown` so background work
/// stops alongside the HTTP server.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    shutdown.cancel();
}
