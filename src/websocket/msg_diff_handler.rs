use tokio::time::Instant;

use crate::models::ContentDiffMessage;
use crate::ws::connctx::ConnCtx;

/// Handle CONTENT_DIFF - buffer until the connection goes quiet
pub fn handle_diff_message(conn: &mut ConnCtx, diff_msg: ContentDiffMessage) {
    conn.content.push(diff_msg.diff, Instant::now());
}
