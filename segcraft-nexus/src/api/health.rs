//! Health check endpoint

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use segcraft_common::time;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "stale" when the supervisor has stopped completing cycles
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// When the supervisor last finished a cycle
    pub last_cycle_at: Option<String>,
}

/// GET /health
///
/// 503 when no supervisor cycle finished within the staleness threshold.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let now = Utc::now();
    let uptime_seconds = now.signed_duration_since(state.startup_time).num_seconds().max(0) as u64;
    let last_cycle_at = state.health.last_cycle_at().await;
    let stale = state
        .health
        .is_stale(now, state.settings.health_staleness_threshold_seconds)
        .await;

    let (status_code, status) = if stale {
        (StatusCode::SERVICE_UNAVAILABLE, "stale")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            module: "segcraft-nexus".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
            last_cycle_at: last_cycle_at.as_ref().map(time::format_ts),
        }),
    )
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
