use std::sync::Arc;
use axum::{
    extract::{Path, Query, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::models::{ClientMessage, ConnectionId, DocumentPath, ErrorResponse, ReceivedMessage};
use crate::websocket::msg_cursor_handler::handle_cursor_message;
use crate::websocket::msg_diff_handler::handle_diff_message;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::ws::connctx::{ClientEnd, ConnCtx, Identity, Transport, TransportClosed};
use crate::ws::docsession::Participant;
use crate::ws::ratelimit::expired;
use crate::ws::registry::SessionRegistry;

const TRANSPORT_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user: String,
    pub name: Option<String>,
}

/// WebSocket handler
pub async fn websocket_handler(
    Path(document_path): Path<String>,
    Query(query): Query<ConnectQuery>,
    State(registry): State<Arc<SessionRegistry>>,
    ws: WebSocketUpgrade,
) -> Response {
    let path = match DocumentPath::parse(document_path.trim_start_matches('/')) {
        Ok(path) => path,
        Err(e) => {
            warn!("Rejected WebSocket connection for '{}': {}", document_path, e);
            return ErrorResponse::reply(StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    if query.user.trim().is_empty() {
        return ErrorResponse::reply(StatusCode::BAD_REQUEST, "Query parameter 'user' is required").into_response();
    }

    info!("New WebSocket connection attempt for {}", path);
    let identity = Identity {
        user_id: query.user,
        display_name: query.name,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, path, identity, registry))
}

/// Pump frames between the socket and an in-memory transport while the
/// connection runs
async fn handle_socket(socket: WebSocket, path: DocumentPath, identity: Identity, registry: Arc<SessionRegistry>) {
    let (mut sink, mut stream) = socket.split();
    let (transport, client) = Transport::pair(TRANSPORT_CAPACITY);
    let ClientEnd { sender, mut receiver } = client;

    // Only text frames carry control messages; pings are answered by axum
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if sender.send(text).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => continue,
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(text) = receiver.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    run_connection(registry, path, identity, transport).await;

    reader.abort();
    // The outbound sender is gone, so the writer drains and stops
    let _ = writer.await;
    info!("WebSocket connection terminated");
}

/// Drive one connection from CONNECTING to CLOSED.
///
/// Inbound frames are handled strictly in receipt order on this task; the
/// throttle and debounce deadlines are polled alongside them.
pub async fn run_connection(registry: Arc<SessionRegistry>, path: DocumentPath, identity: Identity, transport: Transport) {
    let Transport { mut inbound, outbound } = transport;
    let id = ConnectionId::new();
    info!("Connection {} connecting to {} as {}", id, path, identity.user_id);

    let participant = Participant::Editor {
        user_id: identity.user_id.clone(),
        display_name: identity.display_name.clone(),
    };
    let session = match registry.attach(&path, id, participant).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open session {} for connection {}: {}", path, id, e);
            return;
        }
    };

    let mut events = session.subscribe();
    let mut conn = ConnCtx::new(id, identity, session, outbound);

    if conn.open().await.is_ok() {
        info!("Connection {} open on {}", id, path);
        loop {
            let step = tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(text) => dispatch(&mut conn, &text).await,
                    None => Err(TransportClosed),
                },
                event = events.recv() => match event {
                    Ok(event) => conn.relay(event).await,
                    Err(RecvError::Lagged(skipped)) => conn.resync(skipped).await,
                    Err(RecvError::Closed) => Err(TransportClosed),
                },
                _ = expired(conn.cursor_deadline()) => {
                    conn.flush_cursor();
                    Ok(())
                }
                _ = expired(conn.content_deadline()) => {
                    conn.flush_content().await;
                    Ok(())
                }
            };
            if step.is_err() {
                break;
            }
        }
    }

    // Frames already received still count, even if the client is gone
    inbound.close();
    while let Ok(text) = inbound.try_recv() {
        let _ = dispatch(&mut conn, &text).await;
    }

    conn.close().await;
    info!("Connection {} closed on {}", id, path);
    drop(conn);
    registry.release(&path, id).await;
}

/// Route one inbound frame. Frames that cannot be routed are dropped; they
/// never end the connection.
async fn dispatch(conn: &mut ConnCtx, text: &str) -> Result<(), TransportClosed> {
    let received = match ReceivedMessage::decode(text) {
        Ok(received) => received,
        Err(e) => {
            warn!("Dropped frame from connection {} on {}: {}", conn.id, conn.session.path(), e);
            return Ok(());
        }
    };

    if let Some(session_id) = &received.session_id {
        if session_id != conn.session.path().as_str() {
            warn!(
                "Dropped frame from connection {} on {}: addressed to session '{}'",
                conn.id,
                conn.session.path(),
                session_id
            );
            return Ok(());
        }
    }

    match received.message {
        ClientMessage::PresencePing(ping_msg) => handle_ping_message(conn, ping_msg).await,
        ClientMessage::CursorUpdate(cursor_msg) => handle_cursor_message(conn, cursor_msg).await,
        ClientMessage::ContentDiff(diff_msg) => {
            handle_diff_message(conn, diff_msg);
            Ok(())
        }
    }
}
