use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::models::{ConnectionId, DocumentPath, SessionStats};
use crate::websocket::handler::run_connection;
use super::connctx::{Identity, Transport};
use super::docsession::{Participant, Session, SessionDeps};

/// Process wide root of all live document sessions.
///
/// The map lock only guards membership; each session carries its own lock,
/// so work on different documents never contends here beyond lookups.
/// Lock order is always registry, then session.
pub struct SessionRegistry {
    deps: SessionDeps,
    sessions: Mutex<HashMap<DocumentPath, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Arc<Self> {
        info!("Session registry initialized");
        Arc::new(Self {
            deps,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get(&self, path: &DocumentPath) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(path).cloned()
    }

    /// Existing session for `path`, or a freshly loaded and started one
    pub async fn get_or_create(&self, path: &DocumentPath) -> Result<Arc<Session>, SessionError> {
        self.get_or_create_with(path, None).await
    }

    /// Like [`get_or_create`](Self::get_or_create), registering the
    /// connection in the same critical section so a concurrent teardown
    /// either sees it or has already finished.
    pub async fn attach(
        &self,
        path: &DocumentPath,
        id: ConnectionId,
        participant: Participant,
    ) -> Result<Arc<Session>, SessionError> {
        self.get_or_create_with(path, Some((id, participant))).await
    }

    async fn get_or_create_with(
        &self,
        path: &DocumentPath,
        connection: Option<(ConnectionId, Participant)>,
    ) -> Result<Arc<Session>, SessionError> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(path) {
                if let Some((id, participant)) = connection {
                    session.add_connection(id, participant).await;
                }
                return Ok(session.clone());
            }
        }

        // Load outside the map lock; a racing loader may win the insert
        let candidate = Session::load(path.clone(), self.deps.clone()).await?;

        let mut sessions = self.sessions.lock().await;
        let session = match sessions.get(path) {
            Some(existing) => existing.clone(),
            None => {
                candidate.start();
                sessions.insert(path.clone(), candidate.clone());
                info!("Session created for {}", path);
                candidate
            }
        };
        if let Some((id, participant)) = connection {
            session.add_connection(id, participant).await;
        }
        Ok(session)
    }

    /// Run a client connection on `path` until its transport closes
    pub async fn connect(self: &Arc<Self>, path: DocumentPath, identity: Identity, transport: Transport) {
        run_connection(self.clone(), path, identity, transport).await
    }

    /// Detach a connection. The last one out flushes the document and, unless
    /// someone connected meanwhile, destroys the session.
    ///
    /// The session leaves the map only while holding the registry lock with no
    /// connections and nothing unsaved; an edit that slipped in during the
    /// flush sends teardown back to flushing.
    pub async fn release(&self, path: &DocumentPath, id: ConnectionId) {
        let Some(session) = self.get(path).await else {
            warn!("Release of connection {} for unknown session {}", id, path);
            return;
        };

        let remaining = session.remove_connection(id).await;
        if remaining > 0 {
            return;
        }

        info!("Last connection left {}, flushing before teardown", path);
        loop {
            if !self.is_current(path, &session).await {
                debug!("Session {} already torn down by another release", path);
                return;
            }
            if session.connection_count().await > 0 {
                info!("Teardown of {} aborted, a connection arrived", path);
                return;
            }
            if let Err(e) = session.flush().await {
                error!("Final flush of {} failed, retrying: {}", path, e);
                tokio::time::sleep(self.deps.timings.autosave_interval).await;
                continue;
            }

            let mut sessions = self.sessions.lock().await;
            let current = sessions.get(path).is_some_and(|s| Arc::ptr_eq(s, &session));
            if !current {
                return;
            }
            if session.connection_count().await > 0 {
                info!("Teardown of {} aborted, a connection arrived", path);
                return;
            }
            if session.is_dirty().await {
                debug!("{} changed during its final flush, flushing again", path);
                continue;
            }
            sessions.remove(path);
            session.shutdown();
            info!("Session destroyed for {}", path);
            return;
        }
    }

    async fn is_current(&self, path: &DocumentPath, session: &Arc<Session>) -> bool {
        self.sessions
            .lock()
            .await
            .get(path)
            .is_some_and(|s| Arc::ptr_eq(s, session))
    }

    /// Operational view of every live session, by path
    pub async fn session_stats(&self) -> Vec<SessionStats> {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(sessions.len());
        for session in sessions {
            stats.push(session.stats().await);
        }
        stats.sort_by(|a, b| a.document_path.cmp(&b.document_path));
        stats
    }

    /// Flush and stop every session; used on server stop
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(e) = session.flush().await {
                error!("Flush of {} on shutdown failed: {}", session.path(), e);
            }
            session.shutdown();
        }
        info!("Session registry shut down");
    }
}
