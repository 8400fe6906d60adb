//! bikepool allocator
//!
//! Serves the allocation API over HTTP and runs the periodic reclaim of
//! overdue bikes against a shared Postgres store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bikepool_allocator::{
    api,
    clock::SystemClock,
    config,
    db::Database,
    engine::AllocationEngine,
    reclaim::{ReclaimWorker, ReclaimWorkerConfig},
    seed,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to BIKEPOOL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting bikepool allocator");
    info!(
        listen_addr = %config.listen_addr,
        cooldown_secs = config.engine.cooldown.num_seconds(),
        overdue_threshold_secs = config.engine.overdue_threshold.num_seconds(),
        reclaim_interval_secs = config.reclaim_interval.as_secs(),
        "Configuration loaded"
    );

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    let store = Arc::new(db.allocation_store());

    // Run migrations and load fixtures in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
        if let Err(e) = seed::seed_fixtures(store.as_ref()).await {
            error!(error = %e, "Failed to seed database");
            return Err(e.into());
        }
    }

    let engine = AllocationEngine::new(store, Arc::new(SystemClock), config.engine.clone());

    // Start reclaim worker in background
    let reclaim_handle = ReclaimWorker::new(
        engine.clone(),
        ReclaimWorkerConfig {
            interval: config.reclaim_interval,
        },
    )
    .start();

    // Create shutdown channel for the HTTP server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::new(engine);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for reclaim worker to shut down...");
    reclaim_handle.stop(Duration::from_secs(10)).await;

    info!("Allocator shutdown complete");
    Ok(())
}
