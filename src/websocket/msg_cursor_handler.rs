use tokio::time::Instant;
use tracing::warn;

use crate::models::CursorUpdateMessage;
use crate::ws::connctx::{ConnCtx, TransportClosed};

/// Handle CURSOR_UPDATE - record the caret for presence and queue it for the
/// throttled broadcast
pub async fn handle_cursor_message(conn: &mut ConnCtx, cursor_msg: CursorUpdateMessage) -> Result<(), TransportClosed> {
    if cursor_msg.user_id != conn.identity.user_id {
        warn!(
            "Connection {} on {} sent a cursor for '{}' but is '{}'",
            conn.id,
            conn.session.path(),
            cursor_msg.user_id,
            conn.identity.user_id
        );
    }

    conn.cursor.offer(cursor_msg.position, Instant::now());
    conn.touch(Some(cursor_msg.position)).await;
    Ok(())
}
