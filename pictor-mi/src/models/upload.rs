//! Assembled upload registry
//!
//! A chunked upload becomes an `AssembledUpload` once every chunk has been
//! received and concatenated. The registry keeps the entry alive between the
//! chunk requests and the later finalize/preview/commit request that
//! consumes it; the age sweep reclaims abandoned entries.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One fully reassembled upload, keyed by the client-supplied identifier.
#[derive(Debug, Clone)]
pub struct AssembledUpload {
    /// Absolute path of the concatenated file inside the chunk scratch dir
    pub path: PathBuf,
    /// Original client-side file name (already sanitized to a basename)
    pub original_name: String,
    pub size_bytes: u64,
    /// Content-sniffed MIME type
    pub mime_type: String,
    /// The per-identifier scratch directory holding `path`
    pub scratch_dir: PathBuf,
    /// Set by archive preview so commit can reuse the extraction
    pub extract_dir: Option<PathBuf>,
    pub assembled_at: DateTime<Utc>,
}

/// Identifier-keyed table of assembled uploads.
///
/// Entries are independent; a writer never touches another identifier's
/// entry, so a concurrent reader cannot observe a torn value.
#[derive(Clone, Default)]
pub struct UploadRegistry {
    entries: Arc<RwLock<HashMap<String, AssembledUpload>>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, identifier: &str) -> Option<AssembledUpload> {
        self.entries.read().await.get(identifier).cloned()
    }

    pub async fn contains(&self, identifier: &str) -> bool {
        self.entries.read().await.contains_key(identifier)
    }

    pub async fn put(&self, identifier: String, upload: AssembledUpload) {
        self.entries.write().await.insert(identifier, upload);
    }

    pub async fn remove(&self, identifier: &str) -> Option<AssembledUpload> {
        self.entries.write().await.remove(identifier)
    }

    /// Record the extraction directory produced by a preview step.
    pub async fn set_extract_dir(&self, identifier: &str, extract_dir: PathBuf) {
        if let Some(entry) = self.entries.write().await.get_mut(identifier) {
            entry.extract_dir = Some(extract_dir);
        }
    }

    /// Remove entries assembled before the cutoff; returns what was dropped
    /// so the caller can delete the backing scratch directories.
    pub async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Vec<AssembledUpload> {
        let mut entries = self.entries.write().await;
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, v)| v.assembled_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }
}
