//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::HttpConfig;
use crate::database::Database;
use crate::error::Result;
use crate::pool::Pool;

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub db: Database,
    pub task_timeout: u64,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    config: HttpConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: HttpConfig, db: Database, pool: Arc<Pool>) -> Self {
        let state = AppState {
            pool,
            db,
            task_timeout: config.task_timeout,
            started_at: Instant::now(),
        };

        Self { config, state }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .expect("Invalid API server address");

        let router = self.build_router();

        info!("Dispense API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| crate::error::CorralError::Internal(e.to_string()))?;

        info!("Dispense API shut down");
        Ok(())
    }
}
