//! Chunked upload receiver
//!
//! Large files arrive one chunk per request. Each chunk is persisted as
//! `chunk_<index>` inside a per-identifier scratch directory; once every
//! index is present the chunks are concatenated in index order (not
//! arrival order) into the final file and the result is registered as an
//! `AssembledUpload`.

use crate::models::{AssembledUpload, UploadRegistry};
use crate::services::inspect;
use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("File name or identifier is empty")]
    MissingField,

    #[error("Invalid upload identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("Upload {0} has already been assembled")]
    AlreadyAssembled(String),

    #[error("Failed to store chunk: {0}")]
    Io(#[from] io::Error),
}

/// Receipt returned for every accepted chunk
#[derive(Debug, Clone)]
pub struct ChunkReceipt {
    pub complete: bool,
    pub received: usize,
    pub total: usize,
}

/// Receives chunks and assembles completed uploads.
#[derive(Clone)]
pub struct ChunkStore {
    chunk_root: PathBuf,
    registry: UploadRegistry,
}

impl ChunkStore {
    pub fn new(chunk_root: PathBuf, registry: UploadRegistry) -> Self {
        Self {
            chunk_root,
            registry,
        }
    }

    /// Persist one chunk; assemble the file when it is the last one missing.
    pub async fn receive_chunk(
        &self,
        identifier: &str,
        chunk_index: usize,
        total_chunks: usize,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<ChunkReceipt, ChunkError> {
        if identifier.is_empty() || file_name.is_empty() {
            return Err(ChunkError::MissingField);
        }
        validate_identifier(identifier)?;

        let total_chunks = total_chunks.max(1);
        if chunk_index >= total_chunks {
            return Err(ChunkError::IndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }

        // A retry racing a finished assembly must not corrupt the result
        if self.registry.contains(identifier).await {
            return Err(ChunkError::AlreadyAssembled(identifier.to_string()));
        }

        // Path traversal defense: only the basename of the client name is used
        let file_name = sanitize_file_name(file_name);

        let upload_dir = self.chunk_root.join(identifier);
        fs::create_dir_all(&upload_dir)?;

        let chunk_path = upload_dir.join(format!("chunk_{}", chunk_index));
        fs::write(&chunk_path, bytes)?;
        debug!(identifier, chunk_index, total_chunks, "chunk stored");

        let received = (0..total_chunks)
            .filter(|i| upload_dir.join(format!("chunk_{}", i)).exists())
            .count();

        if received < total_chunks {
            return Ok(ChunkReceipt {
                complete: false,
                received,
                total: total_chunks,
            });
        }

        self.assemble(identifier, total_chunks, &file_name, &upload_dir)
            .await?;

        Ok(ChunkReceipt {
            complete: true,
            received: total_chunks,
            total: total_chunks,
        })
    }

    /// Concatenate `chunk_0..n-1` into the final file and register it.
    async fn assemble(
        &self,
        identifier: &str,
        total_chunks: usize,
        file_name: &str,
        upload_dir: &Path,
    ) -> Result<(), ChunkError> {
        let final_path = upload_dir.join(file_name);
        let mut output = File::create(&final_path)?;

        for i in 0..total_chunks {
            let chunk_path = upload_dir.join(format!("chunk_{}", i));
            let mut chunk = File::open(&chunk_path)?;
            io::copy(&mut chunk, &mut output)?;
            fs::remove_file(&chunk_path)?;
        }
        drop(output);

        let size_bytes = fs::metadata(&final_path)?.len();
        let mime_type = inspect::sniff_mime(&final_path);

        info!(
            identifier,
            file_name,
            size_bytes,
            mime_type = %mime_type,
            "chunked upload assembled"
        );

        self.registry
            .put(
                identifier.to_string(),
                AssembledUpload {
                    path: final_path,
                    original_name: file_name.to_string(),
                    size_bytes,
                    mime_type,
                    scratch_dir: upload_dir.to_path_buf(),
                    extract_dir: None,
                    assembled_at: Utc::now(),
                },
            )
            .await;

        Ok(())
    }

    /// Drop registry entries and scratch directories older than `max_age`.
    /// Abandoned uploads are reclaimed by age, not by explicit cancel.
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut removed = 0;
        for upload in self.registry.remove_older_than(cutoff).await {
            if let Some(extract_dir) = &upload.extract_dir {
                let _ = fs::remove_dir_all(extract_dir);
            }
            if fs::remove_dir_all(&upload.scratch_dir).is_ok() {
                removed += 1;
            }
        }

        removed + remove_dirs_older_than(&self.chunk_root, max_age)
    }
}

/// Remove direct subdirectories of `root` not modified within `max_age`.
/// Shared by the periodic sweep for chunk and extraction scratch space.
pub fn remove_dirs_older_than(root: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };

    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "reclaimed stale scratch directory");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "scratch cleanup failed"),
            }
        }
    }

    removed
}

fn validate_identifier(identifier: &str) -> Result<(), ChunkError> {
    let ok = identifier.len() <= 128
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !ok || identifier.contains("..") {
        return Err(ChunkError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}

fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string())
}
