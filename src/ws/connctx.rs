use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::models::{
    ConfigMessage, ConnectionId, ContentUpdateMessage, CursorPosition, CursorUpdateMessage,
    PresenceListMessage, PresenceUser, SendMessage, UserId,
};
use super::docsession::{Session, SessionEvent};
use super::presence::Heartbeat;
use super::ratelimit::{Debounce, Throttle};

/// Text-frame duplex channel to one client. The inbound side ending means the
/// client went away; a failed outbound send means the same.
pub struct Transport {
    pub inbound: mpsc::Receiver<String>,
    pub outbound: mpsc::Sender<String>,
}

/// The client's half of an in-memory [`Transport`]
pub struct ClientEnd {
    pub sender: mpsc::Sender<String>,
    pub receiver: mpsc::Receiver<String>,
}

impl Transport {
    pub fn pair(capacity: usize) -> (Transport, ClientEnd) {
        let (to_server, inbound) = mpsc::channel(capacity);
        let (outbound, from_server) = mpsc::channel(capacity);
        (
            Transport { inbound, outbound },
            ClientEnd {
                sender: to_server,
                receiver: from_server,
            },
        )
    }
}

/// Who is on the other end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Open => write!(f, "OPEN"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// The transport is gone; the connection loop should wind down
#[derive(Debug)]
pub struct TransportClosed;

/// Per-connection state, owned by the connection task
pub struct ConnCtx {
    pub id: ConnectionId,
    pub identity: Identity,
    pub session: Arc<Session>,
    state: ConnectionState,
    outbound: mpsc::Sender<String>,
    pub(crate) cursor: Throttle<CursorPosition>,
    pub(crate) content: Debounce<Vec<u8>>,
    last_cursor_broadcast_at: Option<Instant>,
}

impl ConnCtx {
    pub fn new(id: ConnectionId, identity: Identity, session: Arc<Session>, outbound: mpsc::Sender<String>) -> Self {
        let timings = *session.timings();
        Self {
            id,
            identity,
            session,
            state: ConnectionState::Connecting,
            outbound,
            cursor: Throttle::new(timings.cursor_throttle),
            content: Debounce::new(timings.content_debounce),
            last_cursor_broadcast_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("Connection {} on {}: {} -> {}", self.id, self.session.path(), self.state, next);
        self.state = next;
    }

    pub fn last_cursor_broadcast_at(&self) -> Option<Instant> {
        self.last_cursor_broadcast_at
    }

    pub async fn send(&self, message: SendMessage) -> Result<(), TransportClosed> {
        let text = match message.encode(self.session.path().as_str()) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode message for connection {} on {}: {}", self.id, self.session.path(), e);
                return Ok(());
            }
        };
        self.outbound.send(text).await.map_err(|_| TransportClosed)
    }

    async fn send_snapshot(&self) -> Result<(), TransportClosed> {
        match self.session.export_snapshot().await {
            Ok(update) => self.send(SendMessage::ContentUpdate(ContentUpdateMessage { update })).await,
            Err(e) => {
                error!("Failed to export {} for connection {}: {}", self.session.path(), self.id, e);
                Ok(())
            }
        }
    }

    /// CONNECTING -> OPEN: hand the client its timings and the current
    /// state, then announce the user.
    ///
    /// Updates merged between subscribing and exporting arrive twice; replicas
    /// ignore operations they already have.
    pub async fn open(&mut self) -> Result<(), TransportClosed> {
        self.send(SendMessage::Config(ConfigMessage::from(self.session.timings()))).await?;
        self.transition(ConnectionState::Open);
        self.send_snapshot().await?;
        self.heartbeat(None).await
    }

    /// Refresh presence; the roster reaches this client either through the
    /// join broadcast or as a direct reply.
    pub async fn heartbeat(&mut self, cursor: Option<CursorPosition>) -> Result<(), TransportClosed> {
        let (outcome, users) = self
            .session
            .heartbeat(&self.identity.user_id, self.identity.display_name.as_deref(), cursor)
            .await;
        match outcome {
            Heartbeat::Joined => Ok(()),
            Heartbeat::Refreshed => self.send_roster(users).await,
        }
    }

    /// Refresh presence without replying; a join is still broadcast
    pub async fn touch(&mut self, cursor: Option<CursorPosition>) {
        let _ = self
            .session
            .heartbeat(&self.identity.user_id, self.identity.display_name.as_deref(), cursor)
            .await;
    }

    pub async fn send_roster(&self, users: Vec<PresenceUser>) -> Result<(), TransportClosed> {
        self.send(SendMessage::PresenceList(PresenceListMessage { users })).await
    }

    pub fn cursor_deadline(&self) -> Option<Instant> {
        self.cursor.deadline()
    }

    pub fn content_deadline(&self) -> Option<Instant> {
        self.content.deadline()
    }

    /// Trailing edge of the cursor throttle
    pub fn flush_cursor(&mut self) {
        if let Some(position) = self.cursor.fire() {
            self.session.broadcast_cursor(self.id, &self.identity.user_id, position);
            self.last_cursor_broadcast_at = Some(Instant::now());
        }
    }

    /// Trailing edge of the content debounce. A batch containing a corrupt
    /// diff is retried diff by diff so only the corrupt ones are dropped.
    pub async fn flush_content(&mut self) {
        let diffs = self.content.drain();
        if diffs.is_empty() {
            return;
        }

        match self.session.apply_update(Some(self.id), &diffs).await {
            Ok(changed) => debug!(
                "Merged {} diff(s) from connection {} into {} (changed: {})",
                diffs.len(),
                self.id,
                self.session.path(),
                changed
            ),
            Err(e) if diffs.len() == 1 => {
                warn!("Dropped diff from connection {} on {}: {}", self.id, self.session.path(), e);
            }
            Err(_) => {
                for diff in diffs {
                    if let Err(e) = self.session.apply_update(Some(self.id), std::slice::from_ref(&diff)).await {
                        warn!("Dropped diff from connection {} on {}: {}", self.id, self.session.path(), e);
                    }
                }
            }
        }
    }

    /// Relay a session event to this client
    pub async fn relay(&mut self, event: SessionEvent) -> Result<(), TransportClosed> {
        match event {
            SessionEvent::ContentUpdate { origin, update } => {
                if origin == Some(self.id) {
                    return Ok(());
                }
                self.send(SendMessage::ContentUpdate(ContentUpdateMessage {
                    update: update.as_ref().clone(),
                }))
                .await
            }
            SessionEvent::Cursor { origin, user_id, position } => {
                if origin == self.id {
                    return Ok(());
                }
                self.send(SendMessage::CursorUpdate(CursorUpdateMessage { user_id, position }))
                    .await
            }
            SessionEvent::Roster(users) => self.send_roster(users.as_ref().clone()).await,
            SessionEvent::UserLeft { user_id } => {
                debug!("Connection {} on {} saw {} leave", self.id, self.session.path(), user_id);
                Ok(())
            }
        }
    }

    /// This client missed events; bring it back to the current state
    pub async fn resync(&mut self, skipped: u64) -> Result<(), TransportClosed> {
        warn!(
            "Connection {} on {} lagged by {} event(s), resending full state",
            self.id,
            self.session.path(),
            skipped
        );
        self.send_snapshot().await?;
        let users = self.session.roster().await;
        self.send_roster(users).await
    }

    /// OPEN -> CLOSED: buffered content is merged, a pending cursor is not
    pub async fn close(&mut self) {
        self.flush_content().await;
        self.cursor.cancel();
        self.transition(ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::config::{RawTimings, Timings};
    use crate::error::PersistError;
    use crate::models::DocumentPath;
    use crate::services::{ContentStore, MarkdownRenderer};
    use crate::ws::docsession::SessionDeps;

    struct BlankStore;

    #[async_trait]
    impl ContentStore for BlankStore {
        async fn load(&self, _path: &DocumentPath) -> Result<Option<String>, PersistError> {
            Ok(None)
        }

        async fn persist(&self, _path: &DocumentPath, _text: &str) -> Result<(), PersistError> {
            Ok(())
        }
    }

    async fn connection() -> (ConnCtx, mpsc::Receiver<String>) {
        let timings = Timings::resolve(&RawTimings {
            autosave_interval: Some(10_000),
            ..RawTimings::default()
        })
        .unwrap();
        let deps = SessionDeps {
            timings,
            store: Arc::new(BlankStore),
            renderer: Arc::new(MarkdownRenderer),
        };
        let session = Session::load(DocumentPath::parse("intro.md").unwrap(), deps)
            .await
            .unwrap();
        let (outbound, received) = mpsc::channel(16);
        let identity = Identity {
            user_id: "alice".to_string(),
            display_name: None,
        };
        (ConnCtx::new(ConnectionId::new(), identity, session, outbound), received)
    }

    #[tokio::test(start_paused = true)]
    async fn walks_connecting_open_closed() {
        let (mut conn, mut received) = connection().await;
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.open().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        let (_, first) = SendMessage::decode(&received.recv().await.unwrap()).unwrap();
        assert!(matches!(first, SendMessage::Config(_)));
        let (_, second) = SendMessage::decode(&received.recv().await.unwrap()).unwrap();
        assert!(matches!(second, SendMessage::ContentUpdate(_)));

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn records_when_the_cursor_was_last_broadcast() {
        let (mut conn, _received) = connection().await;
        let mut events = conn.session.subscribe();
        assert_eq!(conn.last_cursor_broadcast_at(), None);

        let offered = Instant::now();
        conn.cursor.offer(3, offered);
        tokio::time::sleep_until(conn.cursor_deadline().unwrap()).await;
        conn.flush_cursor();
        assert_eq!(conn.last_cursor_broadcast_at(), Some(offered + Duration::from_millis(100)));
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Cursor { position: 3, .. })));

        // Nothing pending: no broadcast, timestamp untouched
        tokio::time::sleep(Duration::from_millis(500)).await;
        conn.flush_cursor();
        assert_eq!(conn.last_cursor_broadcast_at(), Some(offered + Duration::from_millis(100)));
        assert!(events.try_recv().is_err());
    }
}
