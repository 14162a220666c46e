//! Corral Proxy Pool Service - Entry Point
//!
//! Starts the maintenance orchestrator and the dispense API with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod database;
mod error;
mod models;
mod orchestrator;
mod pool;
mod repository;
mod scheduler;
mod sources;
mod validator;

use api::ApiServer;
use config::Config;
use database::Database;
use orchestrator::Orchestrator;
use pool::Pool;
use repository::UsageRepository;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corral=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Corral Proxy Pool Service");

    // Load configuration; invalid configuration is fatal here
    let config = Config::from_env()?;
    info!("Configuration loaded");

    // Connect to database
    let db = Database::new(&config).await?;
    info!("Connected to database");

    // Run migrations
    db.run_migrations().await?;
    info!("Database migrations complete");

    // Build the pool facade (store + scheduler + validator)
    let pool = Arc::new(Pool::new(&db, &config.fetch, config.validator.clone()));
    info!(
        max_fail_count = pool.max_fail_count(),
        workers = config.validator.max_workers,
        "Proxy pool initialised"
    );

    // Upstream sources
    let paid_sources = sources::paid_sources(&config.fetch);
    let free_sources = sources::free_sources(&config.fetch);
    info!(
        paid = paid_sources.len(),
        free = free_sources.len(),
        "Sources configured"
    );

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start the orchestrator
    let orchestrator = Orchestrator::new(
        pool.clone(),
        UsageRepository::new(db.pool().clone()),
        paid_sources,
        free_sources,
        config.schedule.clone(),
    );
    let orchestrator_shutdown = shutdown_tx.subscribe();
    let orchestrator_task = tokio::spawn(async move {
        orchestrator.run(orchestrator_shutdown).await;
    });

    // Start the dispense API
    let api_server = ApiServer::new(config.http.clone(), db.clone(), pool.clone());
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("Dispense API error: {}", e);
        }
    });

    info!(listen_addr = %config.http.listen_addr, "Service started");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Drain: in-flight jobs complete, the next ticks never fire
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(orchestrator_task, api_task);

    db.close().await;
    info!("Corral stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
