//! Statistics and health handlers

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::CorralError;

/// Aggregated pool statistics
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CorralError> {
    let stats = state.pool.stats().await?;
    Ok(Json(stats))
}

/// Liveness probe with database round-trip latency
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CorralError> {
    let db_latency = state.db.health_check().await?;

    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "db_latency_ms": db_latency.as_millis() as u64,
    })))
}
