//! Health endpoints
//!
//! - `/health` - Basic health check (returns "ok")
//! - `/ready` - Readiness probe (catalog connectivity and secrets manager)
//!
//! The secrets manager is built lazily; the server builds it at startup, so a
//! readiness probe that finds it uninitialized means startup did not finish.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: ComponentHealth,
    pub secrets: ComponentHealth,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: Option<u64>, message: Option<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms,
            message,
        }
    }

    fn unhealthy(message: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message),
        }
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}

/// Readiness probe
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match check_database_health(&state).await {
        Ok(latency_ms) => ComponentHealth::healthy(Some(latency_ms), None),
        Err(e) => ComponentHealth::unhealthy(e),
    };

    let secrets = if state.secrets.is_initialized() {
        ComponentHealth::healthy(None, Some(format!("{} mode", state.secrets.mode())))
    } else {
        ComponentHealth::unhealthy("secrets manager not initialized".to_string())
    };

    let status = if database.status == HealthStatus::Healthy && secrets.status == HealthStatus::Healthy
    {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    let status_code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    tracing::debug!(status = ?status, "Readiness check completed");

    (
        status_code,
        Json(HealthResponse {
            status,
            database,
            secrets,
        }),
    )
}

async fn check_database_health(state: &AppState) -> Result<u64, String> {
    let start = std::time::Instant::now();

    let conn = state
        .backend
        .get_connection()
        .await
        .map_err(|e| format!("Failed to get connection: {}", e))?;

    tokio::task::spawn_blocking(move || conn.query_row("SELECT 1", [], |_| Ok(())))
        .await
        .map_err(|e| format!("Task join error: {}", e))?
        .map_err(|e| format!("Database query failed: {}", e))?;

    Ok(start.elapsed().as_millis() as u64)
}
