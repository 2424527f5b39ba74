use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Live sessions and host load
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics snapshot", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Server-sent stream of rendered previews. Each `render` event carries a
/// `RenderedPreview` as JSON; comment lines keep idle streams open.
#[utoipa::path(
    get,
    path = "/api/v1/preview/{path}",
    params(
        ("path" = String, Path, description = "Document path relative to the content root")
    ),
    responses(
        (status = 200, description = "text/event-stream of render events", body = RenderedPreview, content_type = "text/event-stream"),
        (status = 400, description = "Invalid document path", body = ErrorResponse),
        (status = 500, description = "Document could not be loaded or rendered", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn preview_stream_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        preview_stream_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, SessionStats, RenderedPreview, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
