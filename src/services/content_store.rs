use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::PersistError;
use crate::models::DocumentPath;

/// Durable home of document sources
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Current source of a document, `None` if it does not exist yet
    async fn load(&self, path: &DocumentPath) -> Result<Option<String>, PersistError>;

    /// Replace the source of a document
    async fn persist(&self, path: &DocumentPath, text: &str) -> Result<(), PersistError>;
}

/// Content store over a directory of source files
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn load(&self, path: &DocumentPath) -> Result<Option<String>, PersistError> {
        let file = path.resolve_under(&self.root);
        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No source on disk for {}", path);
                return Ok(None);
            }
            Err(e) => return Err(io_error(&file, e)),
        };

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| PersistError::Encoding(path.to_string()))
    }

    async fn persist(&self, path: &DocumentPath, text: &str) -> Result<(), PersistError> {
        let file = path.resolve_under(&self.root);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        // Write next to the target and rename so readers never see a torn file
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = file.with_file_name(format!(".{}.autosave", file_name));
        tokio::fs::write(&staging, text.as_bytes())
            .await
            .map_err(|e| io_error(&staging, e))?;
        tokio::fs::rename(&staging, &file)
            .await
            .map_err(|e| io_error(&file, e))?;

        info!("Persisted {} ({} bytes)", path, text.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_document_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        assert_eq!(store.root(), dir.path());
        let path = DocumentPath::parse("intro.md").unwrap();
        assert_eq!(store.load(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn persist_creates_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let path = DocumentPath::parse("guides/setup/intro.md").unwrap();

        store.persist(&path, "# Setup\n").await.unwrap();
        store.persist(&path, "# Setup\n\nDone.\n").await.unwrap();

        assert_eq!(store.load(&path).await.unwrap().as_deref(), Some("# Setup\n\nDone.\n"));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("guides/setup"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn non_utf8_source_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.md"), [0xff, 0xfe, 0x00]).unwrap();
        let store = FsContentStore::new(dir.path());
        let path = DocumentPath::parse("bin.md").unwrap();
        assert!(matches!(store.load(&path).await, Err(PersistError::Encoding(_))));
    }
}
