//! Archive import orchestration
//!
//! Preview extracts and classifies without writing to the catalog and
//! leaves the extraction in place; commit drives every candidate through
//! the pipeline with partial-failure semantics, then tears down all
//! scratch state whether it succeeded or not.

use crate::db::{albums, history};
use crate::error::ApiError;
use crate::models::{AssembledUpload, ImportProgress, ImportStatus};
use crate::services::archive::{self, ArchiveError};
use crate::services::sidecar;
use crate::workflow::pipeline::{process_media_file, FileOutcome, MediaSource};
use crate::AppState;
use futures::{stream, StreamExt};
use pictor_common::human_size::format_bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PreviewFileInfo {
    pub filename: String,
    pub size: u64,
    pub size_formatted: String,
    pub has_metadata: bool,
    pub people: Vec<String>,
    pub datetime: Option<String>,
    pub has_location: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonStat {
    pub name: String,
    pub count: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PreviewSummary {
    pub total_files: usize,
    pub matched_files: Vec<PreviewFileInfo>,
    pub filtered_files: Vec<PreviewFileInfo>,
    pub files_without_metadata: Vec<PreviewFileInfo>,
    pub people_stats: Vec<PersonStat>,
}

#[derive(Debug, Default)]
pub struct CommitOptions {
    pub album_title: Option<String>,
    pub album_description: Option<String>,
    pub people_filter: Vec<String>,
}

#[derive(Debug)]
pub struct CommitSummary {
    pub album_id: Uuid,
    pub history_id: Uuid,
    pub imported: usize,
    pub failed: usize,
    pub total: usize,
}

/// Validate the upload as an archive and make sure it is extracted,
/// reusing a preview's extraction when one is still on disk.
async fn prepare_extraction(
    state: &AppState,
    identifier: &str,
    upload: &AssembledUpload,
) -> Result<PathBuf, ApiError> {
    if !upload.original_name.to_lowercase().ends_with(".zip") {
        return Err(ApiError::BadRequest(
            "Only ZIP archives are supported".to_string(),
        ));
    }
    if upload.size_bytes > state.config.max_archive_bytes {
        return Err(ApiError::TooLarge(format!(
            "Archive exceeds the {} byte ceiling",
            state.config.max_archive_bytes
        )));
    }

    if let Some(dir) = &upload.extract_dir {
        if dir.exists() {
            info!(identifier, dir = %dir.display(), "reusing preview extraction");
            return Ok(dir.clone());
        }
    }

    let extract_dir = state.layout.extract_dir().join(identifier);
    let archive_path = upload.path.clone();
    let target = extract_dir.clone();
    let limit = state.config.max_uncompressed_bytes;

    let extracted = tokio::task::spawn_blocking(move || {
        archive::extract_archive(&archive_path, &target, limit)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("extraction task failed: {}", e)))?;

    match extracted {
        Ok(count) => {
            info!(identifier, entries = count, "archive extracted");
        }
        Err(ArchiveError::TooLarge { total, limit }) => {
            return Err(ApiError::TooLarge(format!(
                "Archive would expand to {} (ceiling {})",
                format_bytes(total),
                format_bytes(limit)
            )));
        }
        Err(ArchiveError::UnsafeEntry(name)) => {
            return Err(ApiError::BadRequest(format!(
                "Archive entry escapes the extraction directory: {}",
                name
            )));
        }
        Err(e @ ArchiveError::Open(_)) | Err(e @ ArchiveError::Zip(_)) => {
            return Err(ApiError::BadRequest(format!("Cannot read archive: {}", e)));
        }
        Err(ArchiveError::Io(e)) => {
            return Err(ApiError::Internal(format!("Extraction failed: {}", e)));
        }
    }

    state
        .uploads
        .set_extract_dir(identifier, extract_dir.clone())
        .await;

    Ok(extract_dir)
}

fn get_upload_or_404(
    upload: Option<AssembledUpload>,
    identifier: &str,
) -> Result<AssembledUpload, ApiError> {
    upload.ok_or_else(|| ApiError::NotFound(format!("No uploaded archive for {}", identifier)))
}

/// Classify archive contents against an optional people filter without
/// touching the catalog. The extraction stays on disk for commit.
pub async fn run_archive_preview(
    state: &AppState,
    identifier: &str,
    people_filter: Vec<String>,
) -> Result<PreviewSummary, ApiError> {
    let upload = get_upload_or_404(state.uploads.get(identifier).await, identifier)?;
    let extract_dir = prepare_extraction(state, identifier, &upload).await?;

    let media_files = archive::collect_media_files(&extract_dir);
    info!(identifier, count = media_files.len(), "preview scan");

    let mut matched = Vec::new();
    let mut filtered = Vec::new();
    let mut without_metadata = Vec::new();
    let mut people_stats: HashMap<String, PersonStat> = HashMap::new();

    for path in &media_files {
        let Ok(meta) = std::fs::metadata(path) else {
            continue;
        };
        if meta.len() > state.config.max_archive_member_bytes {
            continue;
        }

        let sidecar_meta = sidecar::load_for_media(path, &extract_dir);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let info = PreviewFileInfo {
            filename: file_name.clone(),
            size: meta.len(),
            size_formatted: format_bytes(meta.len()),
            has_metadata: sidecar_meta.is_some(),
            people: sidecar_meta
                .as_ref()
                .map(|s| s.people.clone())
                .unwrap_or_default(),
            datetime: sidecar_meta
                .as_ref()
                .and_then(|s| s.captured_at)
                .map(|dt| dt.to_rfc3339()),
            has_location: sidecar_meta
                .as_ref()
                .map(|s| s.latitude.is_some() && s.longitude.is_some())
                .unwrap_or(false),
        };

        for person in &info.people {
            let stat = people_stats
                .entry(person.clone())
                .or_insert_with(|| PersonStat {
                    name: person.clone(),
                    count: 0,
                    files: Vec::new(),
                });
            stat.count += 1;
            stat.files.push(file_name.clone());
        }

        match &sidecar_meta {
            Some(s) if !sidecar::matches_people(&s.people, &people_filter) => filtered.push(info),
            Some(_) => matched.push(info),
            None if !people_filter.is_empty() => without_metadata.push(info),
            None => matched.push(info),
        }
    }

    let mut people_stats: Vec<PersonStat> = people_stats.into_values().collect();
    people_stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

    Ok(PreviewSummary {
        total_files: media_files.len(),
        matched_files: matched,
        filtered_files: filtered,
        files_without_metadata: without_metadata,
        people_stats,
    })
}

/// Import an archive into a new album.
pub async fn run_archive_commit(
    state: &AppState,
    identifier: &str,
    options: CommitOptions,
) -> Result<CommitSummary, ApiError> {
    let upload = get_upload_or_404(state.uploads.get(identifier).await, identifier)?;

    let extract_dir = match prepare_extraction(state, identifier, &upload).await {
        Ok(dir) => dir,
        Err(e) => {
            // Environment-level failure before any catalog state exists
            cleanup_scratch(state, identifier, &upload, None).await;
            return Err(e);
        }
    };

    let media_files = archive::collect_media_files(&extract_dir);

    let album_title = options
        .album_title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            Path::new(&upload.original_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| upload.original_name.clone())
        });

    let setup: anyhow::Result<(Uuid, Uuid)> = async {
        let album_id = albums::create_album(
            &state.db,
            &album_title,
            options.album_description.as_deref(),
        )
        .await?;
        let history_id = history::create_batch(
            &state.db,
            album_id,
            &upload.original_name,
            upload.size_bytes as i64,
            media_files.len() as i64,
        )
        .await?;
        Ok((album_id, history_id))
    }
    .await;

    let (album_id, history_id) = match setup {
        Ok(ids) => ids,
        Err(e) => {
            error!(identifier, error = %e, "could not set up import batch");
            cleanup_scratch(state, identifier, &upload, Some(&extract_dir)).await;
            return Err(ApiError::Internal(format!("Import setup failed: {}", e)));
        }
    };

    info!(
        identifier,
        album = %album_id,
        batch = %history_id,
        files = media_files.len(),
        "archive import started"
    );

    let mut progress = ImportProgress {
        total: media_files.len(),
        ..Default::default()
    };
    state.progress.put(history_id, progress.clone()).await;

    let mut imported: usize = 0;
    let mut failed: usize = 0;

    // Bounded worker pool over the candidate files. Tasks run a few at a
    // time and all die with this future if the request goes away; the
    // album display order follows the archive index, not completion
    // order. Hash-dedup between concurrently processed twins is
    // best-effort, same as concurrent uploads of the same bytes.
    let concurrency = state.config.import_concurrency.max(1);
    let extract_dir_ref = &extract_dir;
    let options_ref = &options;
    let mut results = stream::iter(media_files.iter().cloned().enumerate())
        .map(move |(index, path)| run_archive_file(state, index, path, extract_dir_ref, options_ref))
        .buffer_unordered(concurrency);

    while let Some((index, file_name, outcome)) = results.next().await {
        match outcome {
            Ok(ArchiveFileOutcome::Imported(media_id)) => {
                if let Err(e) =
                    albums::add_media_to_album(&state.db, album_id, media_id, index as i64).await
                {
                    warn!(file = %file_name, error = %e, "album membership insert failed");
                    failed += 1;
                } else {
                    imported += 1;
                }
            }
            Ok(ArchiveFileOutcome::Duplicate) => {
                // Known content: neither imported nor failed
            }
            Ok(ArchiveFileOutcome::Filtered) => {
                // Excluded by the people filter; not an error
            }
            Ok(ArchiveFileOutcome::Rejected(reason)) => {
                warn!(file = %file_name, reason = %reason, "file rejected");
                failed += 1;
            }
            Err(e) => {
                // Partial-failure semantics: one bad file never aborts
                // the batch
                warn!(file = %file_name, error = %e, "file processing failed");
                failed += 1;
            }
        }

        progress.processed += 1;
        progress.current_file = file_name;
        progress.imported = imported;
        progress.failed = failed;
        state.progress.put(history_id, progress.clone()).await;
    }
    drop(results);

    if let Err(e) = albums::refresh_cover(&state.db, album_id).await {
        warn!(album = %album_id, error = %e, "cover selection failed");
    }

    if let Err(e) =
        history::complete_batch(&state.db, history_id, imported as i64, failed as i64).await
    {
        error!(batch = %history_id, error = %e, "could not finalize import history");
    }

    progress.status = ImportStatus::Completed;
    state.progress.put(history_id, progress).await;

    cleanup_scratch(state, identifier, &upload, Some(&extract_dir)).await;

    info!(
        identifier,
        imported, failed, total = media_files.len(),
        "archive import finished"
    );

    Ok(CommitSummary {
        album_id,
        history_id,
        imported,
        failed,
        total: media_files.len(),
    })
}

enum ArchiveFileOutcome {
    Imported(Uuid),
    Duplicate,
    Filtered,
    Rejected(String),
}

async fn run_archive_file(
    state: &AppState,
    index: usize,
    path: PathBuf,
    extract_dir: &Path,
    options: &CommitOptions,
) -> (usize, String, anyhow::Result<ArchiveFileOutcome>) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let outcome = process_archive_file(state, &path, &file_name, extract_dir, options).await;
    (index, file_name, outcome)
}

async fn process_archive_file(
    state: &AppState,
    path: &Path,
    file_name: &str,
    extract_dir: &Path,
    options: &CommitOptions,
) -> anyhow::Result<ArchiveFileOutcome> {
    let size = std::fs::metadata(path)?.len();
    if size > state.config.max_archive_member_bytes {
        return Ok(ArchiveFileOutcome::Rejected(format!(
            "{} exceeds the per-file ceiling",
            format_bytes(size)
        )));
    }

    let sidecar_meta = sidecar::load_for_media(path, extract_dir);

    if !options.people_filter.is_empty() {
        match &sidecar_meta {
            // With an active filter, files with no sidecar at all are
            // excluded rather than imported blind
            None => return Ok(ArchiveFileOutcome::Filtered),
            Some(s) if !sidecar::matches_people(&s.people, &options.people_filter) => {
                return Ok(ArchiveFileOutcome::Filtered);
            }
            Some(_) => {}
        }
    }

    let outcome = process_media_file(
        state,
        MediaSource {
            path,
            original_name: file_name,
            declared_mime: None,
            title: None,
            description: None,
            sidecar: sidecar_meta,
            client_exif: None,
            client_thumbnail: None,
            move_source: false,
        },
    )
    .await?;

    Ok(match outcome {
        FileOutcome::Imported(guid) => ArchiveFileOutcome::Imported(guid),
        FileOutcome::Duplicate => ArchiveFileOutcome::Duplicate,
        FileOutcome::Rejected(reason) => ArchiveFileOutcome::Rejected(reason),
    })
}

/// Remove every piece of scratch state for an upload: the extraction
/// tree, the chunk directory (which holds the archive itself) and the
/// registry entry. Runs on success and on failure alike.
async fn cleanup_scratch(
    state: &AppState,
    identifier: &str,
    upload: &AssembledUpload,
    extract_dir: Option<&Path>,
) {
    if let Some(dir) = extract_dir {
        let _ = std::fs::remove_dir_all(dir);
    } else if let Some(dir) = &upload.extract_dir {
        let _ = std::fs::remove_dir_all(dir);
    }
    let _ = std::fs::remove_dir_all(&upload.scratch_dir);
    state.uploads.remove(identifier).await;
}
