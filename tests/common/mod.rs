#![allow(dead_code)]

use async_trait::async_trait;
use docs_collab::config::{RawTimings, Timings};
use docs_collab::error::{PersistError, RenderError};
use docs_collab::models::{ClientMessage, ContentDiffMessage, DocumentPath, SendMessage};
use docs_collab::services::{ContentStore, Renderer};
use docs_collab::ws::docstore::TEXT_CONTAINER;
use docs_collab::ws::{ClientEnd, Identity, SessionDeps, SessionRegistry, Transport};
use loro::{ExportMode, LoroDoc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// In-memory content store counting successful writes
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    failing: AtomicBool,
    persist_delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn with_file(path: &str, text: &str) -> Arc<Self> {
        let store = Self::default();
        store.files.lock().unwrap().insert(path.to_string(), text.to_string());
        Arc::new(store)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every write take `delay` before it lands
    pub fn set_persist_delay(&self, delay: Duration) {
        *self.persist_delay.lock().unwrap() = delay;
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn load(&self, path: &DocumentPath) -> Result<Option<String>, PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk unreadable"),
            });
        }
        Ok(self.files.lock().unwrap().get(path.as_str()).cloned())
    }

    async fn persist(&self, path: &DocumentPath, text: &str) -> Result<(), PersistError> {
        let delay = *self.persist_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.files.lock().unwrap().insert(path.to_string(), text.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Renders the source verbatim inside a `<pre>`
#[derive(Default)]
pub struct EchoRenderer {
    renders: AtomicUsize,
}

impl EchoRenderer {
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl Renderer for EchoRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!("<pre>{source}</pre>"))
    }
}

pub fn timings(autosave_ms: u64) -> Timings {
    Timings::resolve(&RawTimings {
        autosave_interval: Some(autosave_ms),
        ..RawTimings::default()
    })
    .unwrap()
}

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<MemoryStore>,
    pub renderer: Arc<EchoRenderer>,
}

pub fn harness(store: Arc<MemoryStore>, timings: Timings) -> Harness {
    let renderer = Arc::new(EchoRenderer::default());
    let registry = SessionRegistry::new(SessionDeps {
        timings,
        store: store.clone(),
        renderer: renderer.clone(),
    });
    Harness {
        registry,
        store,
        renderer,
    }
}

pub fn path(raw: &str) -> DocumentPath {
    DocumentPath::parse(raw).unwrap()
}

/// A client holding its own replica of the document
pub struct TestClient {
    pub user: String,
    pub session_id: String,
    pub end: ClientEnd,
    pub doc: LoroDoc,
    pub task: JoinHandle<()>,
}

impl TestClient {
    /// Connect without consuming anything the server sends
    pub fn spawn(registry: &Arc<SessionRegistry>, doc_path: &str, user: &str) -> Self {
        let (transport, end) = Transport::pair(1024);
        let registry = registry.clone();
        let document = path(doc_path);
        let identity = Identity {
            user_id: user.to_string(),
            display_name: Some(user.to_uppercase()),
        };
        let task = tokio::spawn(async move { registry.connect(document, identity, transport).await });
        Self {
            user: user.to_string(),
            session_id: doc_path.to_string(),
            end,
            doc: LoroDoc::new(),
            task,
        }
    }

    /// Connect and wait until the handshake is done: CONFIG, the initial
    /// state, then the roster announcing this user
    pub async fn connect(registry: &Arc<SessionRegistry>, doc_path: &str, user: &str) -> Self {
        let mut client = Self::spawn(registry, doc_path, user);
        assert!(matches!(client.recv().await, SendMessage::Config(_)));
        client
            .recv_until(|m| matches!(m, SendMessage::PresenceList(l) if l.users.iter().any(|u| u.user_id == user)))
            .await;
        client
    }

    /// Next message; content updates are merged into the local replica
    pub async fn recv(&mut self) -> SendMessage {
        let text = timeout(Duration::from_secs(120), self.end.receiver.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("server closed the transport");
        let (session_id, message) = SendMessage::decode(&text).unwrap();
        assert_eq!(session_id, self.session_id);
        if let SendMessage::ContentUpdate(update) = &message {
            self.doc.import(&update.update).unwrap();
        }
        message
    }

    pub async fn recv_until(&mut self, mut wanted: impl FnMut(&SendMessage) -> bool) -> SendMessage {
        loop {
            let message = self.recv().await;
            if wanted(&message) {
                return message;
            }
        }
    }

    /// Everything already queued, without waiting
    pub fn drain(&mut self) -> Vec<SendMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = self.end.receiver.try_recv() {
            let (_, message) = SendMessage::decode(&text).unwrap();
            if let SendMessage::ContentUpdate(update) = &message {
                self.doc.import(&update.update).unwrap();
            }
            messages.push(message);
        }
        messages
    }

    pub async fn send(&self, message: ClientMessage) {
        self.send_raw(message.encode(&self.session_id)).await;
    }

    pub async fn send_raw(&self, text: String) {
        self.end.sender.send(text).await.unwrap();
    }

    /// Edit the local replica and ship the change as a CONTENT_DIFF
    pub async fn insert(&self, pos: usize, s: &str) {
        let before = self.doc.oplog_vv();
        self.doc.get_text(TEXT_CONTAINER).insert(pos, s).unwrap();
        self.doc.commit();
        let diff = self.doc.export(ExportMode::updates(&before)).unwrap();
        self.send(ClientMessage::ContentDiff(ContentDiffMessage { diff })).await;
    }

    pub fn text(&self) -> String {
        self.doc.get_text(TEXT_CONTAINER).to_string()
    }

    /// Close the transport and wait for the server to finish with it
    pub async fn disconnect(self) {
        let TestClient { end, task, .. } = self;
        drop(end);
        task.await.unwrap();
    }
}
