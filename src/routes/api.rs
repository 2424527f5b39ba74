use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handlers::{diagnostics, health_check, preview_stream, ready_check};
use crate::websocket::handler::websocket_handler;
use crate::ws::SessionRegistry;

/// Create API routes
pub fn create_api_routes(registry: Arc<SessionRegistry>) -> Router {
    Router::<Arc<SessionRegistry>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/preview/*path", get(preview_stream))
        .with_state(registry)
}

/// Create the collaboration socket route, one socket per document
pub fn create_ws_routes(registry: Arc<SessionRegistry>) -> Router {
    Router::<Arc<SessionRegistry>>::new()
        .route("/*path", get(websocket_handler))
        .with_state(registry)
}
