//! Health check handler and response types.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Global CPU usage, e.g. `12.5%`
    pub cpu: String,
    /// Free memory, e.g. `2048MB`
    pub free_memory: String,
    pub uploads: UploadsHealth,
    pub dependencies: DependencyHealth,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadsHealth {
    pub in_flight: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub file_system_writable: bool,
    /// `healthy` when uploads would currently reach storage, else `unhealthy`
    pub circuit_breaker: String,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.metrics();
    let snapshot = metrics.snapshot();
    let cpu_usage = metrics.cpu_usage_percent();

    let file_system_writable = state.storage.is_writable().await;

    let circuit_breaker = match state.breaker.probe() {
        Ok(()) => "healthy",
        Err(err) => {
            tracing::debug!(
                error = %err,
                state = state.breaker.state().as_str(),
                "Storage circuit not closed"
            );
            "unhealthy"
        }
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            cpu: format!("{:.2}%", cpu_usage),
            free_memory: format!("{}MB", snapshot.free_memory_bytes / BYTES_PER_MB),
            uploads: UploadsHealth {
                in_flight: state.limiter.in_flight(),
                capacity: state.limiter.capacity(),
            },
            dependencies: DependencyHealth {
                file_system_writable,
                circuit_breaker: circuit_breaker.to_string(),
            },
        }),
    )
}
