//! Proxy dispensing and management handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::api::server::AppState;
use crate::error::CorralError;
use crate::models::{CreateProxyRequest, ProxyType, StatusReport, UpdateProxyRequest};
use crate::scheduler::{Strategy, Task};

/// Query parameters for `GET /api/proxy`
#[derive(Debug, Deserialize, Default)]
pub struct DispenseQuery {
    #[serde(rename = "type")]
    pub proxy_type: Option<String>,
    pub strategy: Option<String>,
    pub require_anon: Option<bool>,
    pub min_speed: Option<i64>,
    pub target_url: Option<String>,
    pub retry_count: Option<i32>,
    pub timeout: Option<u64>,
}

impl DispenseQuery {
    /// Build a scheduling task from the request, falling back to the
    /// server-wide task timeout
    fn into_task(self, default_timeout: u64) -> Task {
        let domain = self.target_url.as_deref().and_then(extract_domain);

        Task {
            proxy_type: self.proxy_type.as_deref().and_then(ProxyType::from_str),
            strategy: self
                .strategy
                .as_deref()
                .map(Strategy::from_str)
                .unwrap_or_default(),
            domain,
            target_url: self.target_url,
            require_anon: self.require_anon.unwrap_or(false),
            min_speed: self.min_speed.filter(|&s| s > 0),
            timeout: Duration::from_secs(self.timeout.unwrap_or(default_timeout)),
            retry_count: self.retry_count.unwrap_or(0),
        }
    }
}

/// Extract the host from a target URL
fn extract_domain(target_url: &str) -> Option<String> {
    url::Url::parse(target_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Dispense a single proxy for a task
pub async fn get_proxy(
    State(state): State<AppState>,
    Query(query): Query<DispenseQuery>,
) -> Result<impl IntoResponse, CorralError> {
    let task = query.into_task(state.task_timeout);
    let proxy = state.pool.acquire(&task).await?;
    Ok(Json(proxy))
}

/// Query parameters for `GET /api/proxies`
#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub proxy_type: Option<String>,
    pub limit: Option<i64>,
}

/// List available proxies
pub async fn list_proxies(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, CorralError> {
    let proxy_type = query.proxy_type.as_deref().and_then(ProxyType::from_str);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let proxies = state.pool.get_proxies(proxy_type, limit).await?;
    Ok(Json(proxies))
}

/// Create a new proxy
pub async fn create_proxy(
    State(state): State<AppState>,
    Json(req): Json<CreateProxyRequest>,
) -> Result<impl IntoResponse, CorralError> {
    if req.ip.is_empty() {
        return Err(CorralError::InvalidRequest("ip is required".to_string()));
    }
    if req.port == 0 {
        return Err(CorralError::InvalidRequest("port is required".to_string()));
    }

    let proxy = state.pool.add_proxy(&req).await?;

    info!(id = proxy.id, endpoint = %proxy.url(), "Created proxy via API");
    Ok((StatusCode::CREATED, Json(proxy)))
}

/// Update a proxy
pub async fn update_proxy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProxyRequest>,
) -> Result<impl IntoResponse, CorralError> {
    let proxy = state.pool.update_proxy(id, &req).await?;

    match proxy {
        Some(p) => Ok(Json(p)),
        None => Err(CorralError::ProxyNotFound { id }),
    }
}

/// Delete a proxy
pub async fn delete_proxy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, CorralError> {
    let deleted = state.pool.remove_proxy(id).await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CorralError::ProxyNotFound { id })
    }
}

/// Consumer feedback for a dispensed proxy
pub async fn report_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(report): Json<StatusReport>,
) -> Result<impl IntoResponse, CorralError> {
    state
        .pool
        .report(id, report.success, report.speed, None)
        .await?;

    Ok(StatusCode::OK)
}
