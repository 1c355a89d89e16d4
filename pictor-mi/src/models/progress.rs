//! Import progress tracking
//!
//! Progress is ephemeral: the orchestrator overwrites the entry for its
//! batch after each file, and the polling endpoint reads a snapshot. It is
//! never persisted; the durable outcome lives in `import_history`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Batch state as shown to the polling client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Processing,
    Completed,
    Failed,
}

/// Progress snapshot for one import batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProgress {
    /// Media files discovered in the archive
    pub total: usize,
    /// Files the loop has reached so far (1-based, includes failures)
    pub processed: usize,
    /// Files written to the catalog
    pub imported: usize,
    /// Files that errored or were rejected
    pub failed: usize,
    /// Name of the file currently being processed
    pub current_file: String,
    pub status: ImportStatus,
}

impl Default for ImportProgress {
    fn default() -> Self {
        Self {
            total: 0,
            processed: 0,
            imported: 0,
            failed: 0,
            current_file: String::new(),
            status: ImportStatus::Processing,
        }
    }
}

/// Batch-id-keyed progress table read by the polling endpoint.
#[derive(Clone, Default)]
pub struct ProgressRegistry {
    entries: Arc<RwLock<HashMap<Uuid, ImportProgress>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, batch_id: Uuid) -> Option<ImportProgress> {
        self.entries.read().await.get(&batch_id).cloned()
    }

    /// Whole-entry overwrite keeps concurrent readers consistent.
    pub async fn put(&self, batch_id: Uuid, progress: ImportProgress) {
        self.entries.write().await.insert(batch_id, progress);
    }

    pub async fn remove(&self, batch_id: Uuid) {
        self.entries.write().await.remove(&batch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_latest_write() {
        let registry = ProgressRegistry::new();
        let id = Uuid::new_v4();

        let mut progress = ImportProgress {
            total: 10,
            ..Default::default()
        };
        registry.put(id, progress.clone()).await;

        progress.processed = 4;
        progress.imported = 3;
        progress.failed = 1;
        progress.current_file = "IMG_0004.jpg".to_string();
        registry.put(id, progress).await;

        let snapshot = registry.get(id).await.unwrap();
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.imported, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.status, ImportStatus::Processing);
    }

    #[tokio::test]
    async fn unknown_batch_is_none() {
        let registry = ProgressRegistry::new();
        assert!(registry.get(Uuid::new_v4()).await.is_none());
    }
}
