use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::debug;

use crate::models::HealthResponse;
use crate::ws::SessionRegistry;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(registry): State<Arc<SessionRegistry>>) -> Json<HealthResponse> {
    debug!("Readiness check requested");
    let n_sessions = registry.session_stats().await.len();
    Json(HealthResponse {
        status: "ok".to_string(),
        message: format!("Service is ready ({} live session(s))", n_sessions),
    })
}
