#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::routes::router;
use server::telemetry::init_telemetry;
use tickstone::{
    FileBoundStore, Migrator, MonotonicClock, StoreInvalidator, TimestampAllocator,
    TimestampService,
};
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type Allocator = TimestampAllocator<FileBoundStore, MonotonicClock>;
type Service = TimestampService<FileBoundStore, MonotonicClock>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let mut allocator = TimestampAllocator::load(
        FileBoundStore::new(&config.store_path),
        MonotonicClock::new(),
        config.allocator,
    )
    .await
    .with_context(|| format!("failed to load bound from {}", config.store_path.display()))?;

    // Migrate before the refresher starts writing the local bound.
    if let Some(legacy) = &config.migrate_from {
        allocator = migrate_from(legacy, allocator, &config).await?;
    }
    let service = TimestampService::start(allocator, config.service);

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config, &service);

    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(config.shutdown_timeout, service.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout = ?config.shutdown_timeout,
            "service did not stop in time"
        );
    }

    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Takes over the namespace of a previous oracle whose bound lives in
/// `legacy`. Safe to repeat: an already invalidated file yields the same
/// bound and fast-forwarding past it again is a no-op.
async fn migrate_from(
    legacy: &std::path::Path,
    allocator: Allocator,
    config: &ServerConfig,
) -> anyhow::Result<Allocator> {
    tracing::info!(from = %legacy.display(), "migrating timestamp authority");

    let source = StoreInvalidator::new(FileBoundStore::new(legacy), config.retry);
    let migrator = Migrator::new(source, allocator).with_ping_timeout(config.ping_timeout);
    let bound = migrator
        .migrate()
        .await
        .with_context(|| format!("migration from {} failed", legacy.display()))?;

    let allocator = migrator.into_destination();
    tracing::info!(bound, last_returned = allocator.last_returned(), "migration complete");
    Ok(allocator)
}

fn log_startup_info(config: &ServerConfig, service: &Service) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting timestamp oracle on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting timestamp oracle on {} (upper limit {})",
            config.server_addr,
            service.upper_limit()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
