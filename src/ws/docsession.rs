use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::Timings;
use crate::error::{PersistError, RenderError, SessionError, StoreError};
use crate::models::{ConnectionId, CursorPosition, DocumentPath, PresenceUser, RenderedPreview, SessionStats, UserId};
use crate::services::{ContentStore, Renderer};
use super::docstore::DocStore;
use super::presence::{Heartbeat, PresenceTracker};
use super::{autosave, render};

const EVENT_CAPACITY: usize = 256;

/// Collaborators every session needs, shared process wide
#[derive(Clone)]
pub struct SessionDeps {
    pub timings: Timings,
    pub store: Arc<dyn ContentStore>,
    pub renderer: Arc<dyn Renderer>,
}

/// What sits behind a connection id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    Editor {
        user_id: UserId,
        display_name: Option<String>,
    },
    /// Preview subscriber; keeps the session alive, never present
    Viewer,
}

/// Fan-out of everything connections relay to their clients
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ContentUpdate {
        origin: Option<ConnectionId>,
        update: Arc<Vec<u8>>,
    },
    Cursor {
        origin: ConnectionId,
        user_id: UserId,
        position: CursorPosition,
    },
    Roster(Arc<Vec<PresenceUser>>),
    /// A user's presence entry was dropped. Always followed by a `Roster`;
    /// connections only log it, since clients learn departures from the roster.
    UserLeft {
        user_id: UserId,
    },
}

struct SessionState {
    doc: DocStore,
    revision: u64,
    saved_revision: u64,
    rendered_revision: Option<u64>,
    last_rendered_hash: Option<String>,
    connections: HashMap<ConnectionId, Participant>,
    presence: PresenceTracker,
}

/// Server side authority for one document
pub struct Session {
    path: DocumentPath,
    deps: SessionDeps,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    preview: watch::Sender<Option<Arc<RenderedPreview>>>,
    flush_lock: Mutex<()>,
    render_lock: Mutex<()>,
    tasks: std::sync::Mutex<Vec<AbortHandle>>,
}

impl Session {
    /// Build a session from the stored source. Background loops are not
    /// running until [`Session::start`].
    pub async fn load(path: DocumentPath, deps: SessionDeps) -> Result<Arc<Self>, SessionError> {
        let initial = deps.store.load(&path).await?.unwrap_or_default();
        let doc = DocStore::with_text(&initial)?;
        info!("Loaded document {} ({} bytes)", path, initial.len());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (preview, _) = watch::channel(None);
        let presence = PresenceTracker::new(deps.timings.stale_threshold);

        Ok(Arc::new(Self {
            path,
            deps,
            state: Mutex::new(SessionState {
                doc,
                revision: 0,
                saved_revision: 0,
                rendered_revision: None,
                last_rendered_hash: None,
                connections: HashMap::new(),
                presence,
            }),
            events,
            preview,
            flush_lock: Mutex::new(()),
            render_lock: Mutex::new(()),
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the render, autosave and presence sweep loops
    pub fn start(self: &Arc<Self>) {
        let handles = [
            tokio::spawn(render::run_render_loop(self.clone())).abort_handle(),
            tokio::spawn(autosave::run_autosave(self.clone())).abort_handle(),
            tokio::spawn(run_presence_sweep(self.clone())).abort_handle(),
        ];
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
        debug!("Background loops started for {}", self.path);
    }

    /// Stop the background loops
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        debug!("Background loops stopped for {}", self.path);
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    pub fn timings(&self) -> &Timings {
        &self.deps.timings
    }

    /// Listen to merges, cursor moves and roster changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine: nobody is connected
        let _ = self.events.send(event);
    }

    pub async fn add_connection(&self, id: ConnectionId, participant: Participant) -> usize {
        let mut state = self.state.lock().await;
        state.connections.insert(id, participant);
        state.connections.len()
    }

    /// Detach a connection. The user's presence goes with its last
    /// connection. Returns how many connections remain.
    pub async fn remove_connection(&self, id: ConnectionId) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.connections.remove(&id);

        if let Some(Participant::Editor { user_id, .. }) = removed {
            let still_connected = state.connections.values().any(|p| {
                matches!(p, Participant::Editor { user_id: other, .. } if *other == user_id)
            });
            if !still_connected && state.presence.remove(&user_id) {
                info!("User {} left {} (connection {} closed)", user_id, self.path, id);
                let roster = state.presence.users(Instant::now());
                self.publish(SessionEvent::UserLeft { user_id });
                self.publish(SessionEvent::Roster(Arc::new(roster)));
            }
        }

        state.connections.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Refresh a user's liveness. A join publishes the new roster to every
    /// connection; otherwise the roster is only returned.
    pub async fn heartbeat(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        cursor: Option<CursorPosition>,
    ) -> (Heartbeat, Vec<PresenceUser>) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let outcome = state.presence.heartbeat(user_id, display_name, cursor, now);
        let roster = state.presence.users(now);
        if outcome == Heartbeat::Joined {
            info!("User {} joined {}", user_id, self.path);
            self.publish(SessionEvent::Roster(Arc::new(roster.clone())));
        }
        (outcome, roster)
    }

    pub async fn roster(&self) -> Vec<PresenceUser> {
        self.state.lock().await.presence.users(Instant::now())
    }

    /// Evict users whose heartbeat went stale
    pub async fn sweep_presence(&self) -> Vec<UserId> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let left = state.presence.sweep(now);
        if !left.is_empty() {
            for user_id in &left {
                info!("User {} timed out on {}", user_id, self.path);
                self.publish(SessionEvent::UserLeft { user_id: user_id.clone() });
            }
            self.publish(SessionEvent::Roster(Arc::new(state.presence.users(now))));
        }
        left
    }

    /// Merge remote updates and rebroadcast what was new.
    /// Returns whether the document changed.
    pub async fn apply_update(&self, origin: Option<ConnectionId>, updates: &[Vec<u8>]) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.doc.apply_update(updates)? {
            Some(change) => {
                state.revision += 1;
                // Published under the lock so peers see merges in merge order
                self.publish(SessionEvent::ContentUpdate {
                    origin,
                    update: Arc::new(change),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Relay a throttled cursor position to the other connections
    pub fn broadcast_cursor(&self, origin: ConnectionId, user_id: &str, position: CursorPosition) {
        self.publish(SessionEvent::Cursor {
            origin,
            user_id: user_id.to_string(),
            position,
        });
    }

    /// Plain text with the revision it reflects
    pub async fn snapshot(&self) -> (String, u64) {
        let state = self.state.lock().await;
        (state.doc.snapshot(), state.revision)
    }

    /// Full replicated state for a joining replica
    pub async fn export_snapshot(&self) -> Result<Vec<u8>, StoreError> {
        self.state.lock().await.doc.export_snapshot()
    }

    pub async fn is_dirty(&self) -> bool {
        let state = self.state.lock().await;
        state.revision > state.saved_revision
    }

    /// Persist the current text if it changed since the last successful
    /// write. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool, PersistError> {
        let _serialized = self.flush_lock.lock().await;

        let (text, revision) = {
            let state = self.state.lock().await;
            if state.revision == state.saved_revision {
                return Ok(false);
            }
            (state.doc.snapshot(), state.revision)
        };

        self.deps.store.persist(&self.path, &text).await?;

        let mut state = self.state.lock().await;
        state.saved_revision = state.saved_revision.max(revision);
        Ok(true)
    }

    /// Re-render if the text changed since the last render; publishes and
    /// returns the preview when its HTML differs from the previous one.
    pub async fn render_if_dirty(&self) -> Result<Option<Arc<RenderedPreview>>, RenderError> {
        let _serialized = self.render_lock.lock().await;

        let (text, revision) = {
            let state = self.state.lock().await;
            if state.rendered_revision == Some(state.revision) {
                return Ok(None);
            }
            (state.doc.snapshot(), state.revision)
        };

        let renderer = self.deps.renderer.clone();
        let html = tokio::task::spawn_blocking(move || renderer.render(&text))
            .await
            .map_err(|e| RenderError::Panicked(e.to_string()))??;
        let hash = format!("{:x}", Sha256::digest(html.as_bytes()));

        let mut state = self.state.lock().await;
        state.rendered_revision = Some(state.rendered_revision.map_or(revision, |r| r.max(revision)));
        if state.last_rendered_hash.as_deref() == Some(hash.as_str()) {
            return Ok(None);
        }

        let preview = Arc::new(RenderedPreview { html, hash: hash.clone() });
        state.last_rendered_hash = Some(hash);
        self.preview.send_replace(Some(preview.clone()));
        Ok(Some(preview))
    }

    /// Latest render, produced on demand when the text moved on
    pub async fn current_preview(&self) -> Result<Arc<RenderedPreview>, RenderError> {
        self.render_if_dirty().await?;
        self.preview
            .borrow()
            .clone()
            .ok_or_else(|| RenderError::Failed(format!("no preview available for {}", self.path)))
    }

    pub fn watch_preview(&self) -> watch::Receiver<Option<Arc<RenderedPreview>>> {
        self.preview.subscribe()
    }

    pub async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await;
        let editors = state
            .connections
            .values()
            .filter(|p| matches!(p, Participant::Editor { .. }))
            .count();
        SessionStats {
            document_path: self.path.to_string(),
            editors: editors as u32,
            viewers: (state.connections.len() - editors) as u32,
            present_users: state.presence.roster(Instant::now()).len() as u32,
            revision: state.revision,
            unsaved: state.revision > state.saved_revision,
            unrendered: state.rendered_revision != Some(state.revision),
            last_rendered_hash: state.last_rendered_hash.clone(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_presence_sweep(session: Arc<Session>) {
    let period = session.timings().sweep_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let left = session.sweep_presence().await;
        if !left.is_empty() {
            debug!("Evicted {} stale user(s) from {}", left.len(), session.path());
        }
    }
}
