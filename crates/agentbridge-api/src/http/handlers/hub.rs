//! Hub health and metrics.
//!
//! GET /api/v1/health  - liveness plus memory pressure summary.
//! GET /api/v1/metrics - aggregate counters, pool and worker statistics.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use agentbridge_types::metrics::{HubMetrics, PressureLevel};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/health
///
/// Reports `degraded` at high or critical memory pressure. Fails with 503
/// when the hub loop is gone.
pub async fn health(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let metrics = state.hub.metrics().await?;

    let status = if metrics.memory.level >= PressureLevel::High {
        "degraded"
    } else {
        "ok"
    };
    let body = json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "connections": metrics.connections_active,
        "memoryLevel": metrics.memory.level,
    });
    Ok(Json(ApiResponse::timed(body, start).with_link("metrics", "/api/v1/metrics")))
}

/// GET /api/v1/metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Json<ApiResponse<HubMetrics>>, AppError> {
    let start = Instant::now();
    let metrics = state.hub.metrics().await?;
    Ok(Json(ApiResponse::timed(metrics, start)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handlers::test_support;

    #[tokio::test]
    async fn health_reports_ok_then_unavailable() {
        let state = test_support::state();
        let Json(body) = health(State(state.clone())).await.unwrap();
        let data = body.data.unwrap();
        assert_eq!(data["status"], "ok");
        assert_eq!(data["memoryLevel"], "LOW");

        state.hub.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let err = health(State(state)).await.unwrap_err();
        assert!(matches!(err, AppError::Hub(agentbridge_types::error::HubError::Unavailable)));
    }

    #[tokio::test]
    async fn metrics_includes_pool_statistics() {
        let state = test_support::state();
        let Json(body) = metrics(State(state)).await.unwrap();
        let metrics = body.data.unwrap();
        assert_eq!(metrics.messages_accepted, 0);
        assert!(metrics.pools.contains_key("offline_queue"));
        assert_eq!(metrics.workers.max_workers, 1);
    }
}
