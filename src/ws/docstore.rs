use loro::{ExportMode, LoroDoc, LoroText, VersionVector};
use tracing::debug;

use crate::error::StoreError;

/// Name of the root text container holding the document source
pub const TEXT_CONTAINER: &str = "content";

/// Replicated text of one document.
///
/// Merging is delegated to Loro: imports commute, are associative and
/// idempotent, so replicas that saw the same set of updates hold the same text
/// regardless of arrival order. This layer only adds batch atomicity and
/// change-set extraction.
pub struct DocStore {
    doc: LoroDoc,
}

impl DocStore {
    pub fn new() -> Self {
        let doc = LoroDoc::new();
        // Materialize the root container so snapshots always carry it
        let _ = doc.get_text(TEXT_CONTAINER);
        Self { doc }
    }

    /// Create a document whose text starts as `initial`
    pub fn with_text(initial: &str) -> Result<Self, StoreError> {
        let store = Self::new();
        if !initial.is_empty() {
            store
                .text()
                .insert(0, initial)
                .map_err(|e| StoreError::Seed(e.to_string()))?;
            store.doc.commit();
        }
        Ok(store)
    }

    fn text(&self) -> LoroText {
        self.doc.get_text(TEXT_CONTAINER)
    }

    /// Merge a batch of remote updates.
    ///
    /// Either every update of the batch is imported or none is. Returns the
    /// change-set of operations that were new to this replica, `None` when the
    /// batch contained nothing new.
    pub fn apply_update(&self, updates: &[Vec<u8>]) -> Result<Option<Vec<u8>>, StoreError> {
        if updates.is_empty() {
            return Ok(None);
        }

        let probe = self.doc.fork();
        for update in updates {
            probe
                .import(update)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        }

        let before = self.doc.oplog_vv();
        for update in updates {
            self.doc
                .import(update)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        }

        if self.doc.oplog_vv() == before {
            debug!("Update batch of {} carried no new operations", updates.len());
            return Ok(None);
        }

        self.export_since(&before).map(Some)
    }

    /// Operations newer than `version`
    pub fn export_since(&self, version: &VersionVector) -> Result<Vec<u8>, StoreError> {
        self.doc
            .export(ExportMode::updates(version))
            .map_err(|e| StoreError::Export(e.to_string()))
    }

    /// Full state, importable by a fresh replica
    pub fn export_snapshot(&self) -> Result<Vec<u8>, StoreError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| StoreError::Export(e.to_string()))
    }

    /// Current plain text
    pub fn snapshot(&self) -> String {
        self.text().to_string()
    }

    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }
}

impl Default for DocStore {
    fn default() -> Self {
        Self::new()
    }
}
