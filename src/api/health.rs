//! Health endpoint
//!
//! GET /api/v1/health reports liveness, database reachability, request
//! statistics and which external providers are configured. Always 200 while
//! the process can answer; `status` is "degraded" when the database ping fails.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::middleware::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub providers: ProviderStatus,
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub transcription: bool,
    pub generation: bool,
    pub wiki: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.pool.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "unreachable"
        }
    };

    let (transcription, generation, wiki) = state.story_service.providers();
    let stats = &state.request_stats;

    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        uptime_seconds: stats.uptime_seconds(),
        total_requests: stats.total_requests(),
        avg_response_time_ms: (stats.avg_response_time_us() / 10.0).round() / 100.0,
        providers: ProviderStatus {
            transcription,
            generation,
            wiki,
        },
    })
}
