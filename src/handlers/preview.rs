use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::models::{ConnectionId, DocumentPath, ErrorResponse};
use crate::utils::ScopeGuard;
use crate::ws::render::{preview_events, PushEvent};
use crate::ws::{Participant, SessionRegistry};

/// Subscribe to the rendered preview of a document.
///
/// The subscriber counts as a viewer of the session until the stream is
/// dropped, so the document stays loaded while someone is watching.
pub async fn preview_stream(
    Path(document_path): Path<String>,
    State(registry): State<Arc<SessionRegistry>>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, Json<ErrorResponse>)> {
    let path = DocumentPath::parse(document_path.trim_start_matches('/')).map_err(|e| {
        warn!("Rejected preview subscription for '{}': {}", document_path, e);
        ErrorResponse::reply(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let viewer = ConnectionId::new();
    let session = registry
        .attach(&path, viewer, Participant::Viewer)
        .await
        .map_err(|e| {
            error!("Failed to open session {} for preview: {}", path, e);
            ErrorResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let guard = {
        let registry = registry.clone();
        let path = path.clone();
        ScopeGuard::new(move || {
            info!("Preview viewer {} left {}", viewer, path);
            tokio::spawn(async move { registry.release(&path, viewer).await });
        })
    };

    // On failure the guard releases the viewer as it goes out of scope
    let initial = session.current_preview().await.map_err(|e| {
        error!("Failed to render {} for preview: {}", path, e);
        ErrorResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let timings = *session.timings();
    info!("Preview viewer {} joined {}", viewer, path);
    let events = preview_events(initial, session.watch_preview(), timings.sse_keepalive).map(move |event| {
        let _viewer = &guard;
        to_sse_event(event, timings.sse_reconnect)
    });

    Ok(Sse::new(events))
}

fn to_sse_event(event: PushEvent, reconnect: Duration) -> Result<Event, axum::Error> {
    match event {
        PushEvent::Render(preview) => Event::default()
            .event("render")
            .retry(reconnect)
            .json_data(preview.as_ref()),
        PushEvent::Keepalive => Ok(Event::default().comment("keepalive")),
    }
}
