use tracing::debug;

use crate::models::PresencePingMessage;
use crate::ws::connctx::{ConnCtx, TransportClosed};

/// Handle PRESENCE_PING - refresh the heartbeat and reply with the roster
pub async fn handle_ping_message(conn: &mut ConnCtx, ping_msg: PresencePingMessage) -> Result<(), TransportClosed> {
    debug!("Ping from connection {} on {}", conn.id, conn.session.path());
    conn.heartbeat(ping_msg.cursor_position).await
}
