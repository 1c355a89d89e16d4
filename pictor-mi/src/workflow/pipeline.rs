//! Per-file processing pipeline
//!
//! One call takes a candidate file from scratch space to a catalog row:
//! classification, HEIC conversion, thumbnail derivation, metadata
//! extraction and merge, reverse geocoding, dedup, insert. Degraded steps
//! (missing converter, missing thumbnail engine, unreachable geocoder)
//! leave their field unset instead of failing the file.

use crate::db::media::{self, MediaFile};
use crate::extractors::exif::{self, rotation_from_orientation};
use crate::extractors::video;
use crate::extractors::{merge_metadata, EmbeddedMetadata};
use crate::services::convert::HeicConverter;
use crate::services::inspect::{self, MediaKind};
use crate::services::sidecar::SidecarMetadata;
use crate::services::thumbnail;
use crate::AppState;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened to one candidate file.
#[derive(Debug)]
pub enum FileOutcome {
    Imported(Uuid),
    /// Content hash already in the catalog; candidate discarded
    Duplicate,
    /// Unsupported or disallowed input, counted as a failure by batches
    Rejected(String),
}

/// One candidate file plus everything the caller already knows about it.
pub struct MediaSource<'a> {
    pub path: &'a Path,
    pub original_name: &'a str,
    /// MIME recorded at assembly time; archive members are sniffed here
    pub declared_mime: Option<&'a str>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub sidecar: Option<SidecarMetadata>,
    /// Client-extracted EXIF (direct uploads only)
    pub client_exif: Option<EmbeddedMetadata>,
    /// Client-rendered video poster frame (direct uploads only)
    pub client_thumbnail: Option<Vec<u8>>,
    /// Move instead of copy when the source is ours to consume
    pub move_source: bool,
}

/// Generated, collision-free stored name: timestamp + uuid prefix + ext.
fn generate_stored_filename(original_name: &str) -> String {
    let ext = Path::new(original_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}.{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &unique[..8],
        ext
    )
}

fn place_file(src: &Path, dst: &Path, move_source: bool) -> Result<()> {
    if move_source {
        // rename fails across filesystems; fall back to copy+remove
        if fs::rename(src, dst).is_ok() {
            return Ok(());
        }
    }
    fs::copy(src, dst).with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
    if move_source {
        let _ = fs::remove_file(src);
    }
    Ok(())
}

/// Run one file through the whole pipeline.
pub async fn process_media_file(
    state: &AppState,
    source: MediaSource<'_>,
) -> Result<FileOutcome> {
    let Some(inspection) = inspect::inspect(source.path, source.declared_mime, source.original_name)
    else {
        return Ok(FileOutcome::Rejected(format!(
            "unsupported media format: {}",
            source.original_name
        )));
    };

    let file_size = fs::metadata(source.path)?.len();

    // Stage into the permanent media tree under a generated name
    let dest_dir = match inspection.kind {
        MediaKind::Image => state.layout.images_dir(),
        MediaKind::Video => state.layout.videos_dir(),
    };
    fs::create_dir_all(&dest_dir)?;

    let mut stored_filename = generate_stored_filename(source.original_name);
    let mut final_path = dest_dir.join(&stored_filename);
    place_file(source.path, &final_path, source.move_source)?;

    let mut mime_type = inspection.mime_type.clone();

    // Embedded metadata is read before conversion; transcoding drops the
    // EXIF block
    let embedded = match inspection.kind {
        MediaKind::Image => source
            .client_exif
            .clone()
            .unwrap_or_else(|| exif::extract_image_metadata(&final_path).into()),
        MediaKind::Video => {
            video::extract_video_metadata(state.tools.ffprobe.as_deref(), &final_path)
                .await
                .into()
        }
    };

    let merged = merge_metadata(source.sidecar.as_ref(), &embedded);
    let rotation = rotation_from_orientation(merged.orientation);

    // HEIC sources become JPEG when any engine can do it; otherwise the
    // original is kept and the client decodes it (degraded mode)
    let mut heic_unconverted = false;
    if inspection.is_heic {
        let converter = HeicConverter::new(&state.tools);
        let jpeg_name = format!(
            "{}.jpg",
            Path::new(&stored_filename)
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
        );
        let jpeg_path = dest_dir.join(&jpeg_name);

        if converter
            .convert_heic_to_jpeg(&final_path, &jpeg_path, 90)
            .await
        {
            fs::remove_file(&final_path)?;
            final_path = jpeg_path;
            stored_filename = jpeg_name;
            mime_type = "image/jpeg".to_string();
        } else {
            heic_unconverted = true;
        }
    }

    let relative_path = state.layout.relative_path(&final_path);

    // Thumbnails
    let thumbnails_dir = state.layout.thumbnails_dir();
    let thumb_stem = Path::new(&stored_filename)
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let thumb_path = thumbnails_dir.join(format!("thumb_{}.jpg", thumb_stem));

    let mut thumbnail_path: Option<String> = None;
    let mut thumbnail_webp_path: Option<String> = None;

    if heic_unconverted {
        // No server-side decoder: the original doubles as its own
        // thumbnail and the client converts at display time
        thumbnail_path = Some(relative_path.clone());
        debug!(file = source.original_name, "HEIC kept unconverted");
    } else {
        let jpeg_ok = match inspection.kind {
            MediaKind::Image => {
                thumbnail::make_image_thumbnail(
                    &state.tools,
                    &final_path,
                    &thumb_path,
                    state.config.thumbnail_width,
                    state.config.thumbnail_quality,
                    rotation,
                )
                .await
            }
            MediaKind::Video => match &source.client_thumbnail {
                Some(bytes) => {
                    fs::create_dir_all(&thumbnails_dir)?;
                    fs::write(&thumb_path, bytes).is_ok()
                }
                None => {
                    thumbnail::make_video_thumbnail(
                        &state.tools,
                        &final_path,
                        &thumb_path,
                        state.config.thumbnail_width,
                        state.config.thumbnail_quality,
                    )
                    .await
                }
            },
        };

        if jpeg_ok {
            thumbnail_path = Some(state.layout.relative_path(&thumb_path));

            if state.config.webp_thumbnails {
                let webp_path = thumbnails_dir.join(format!("thumb_{}.webp", thumb_stem));
                if thumbnail::make_webp_sibling(
                    &thumb_path,
                    &webp_path,
                    state.config.thumbnail_quality,
                ) {
                    thumbnail_webp_path = Some(state.layout.relative_path(&webp_path));
                }
            }
        }
    }

    // Reverse geocoding is rate limited to one call per second, so bulk
    // imports pay seconds per located file; the flag turns it off
    let location_name = match (state.config.geocode_on_import, merged.latitude, merged.longitude) {
        (true, Some(lat), Some(lon)) => state.geocoder.resolve(lat, lon).await,
        _ => None,
    };

    // Dedup on the final stored bytes
    let file_hash = media::calculate_file_hash(&final_path)?;
    if let Some(existing) = media::find_by_hash(&state.db, &file_hash).await? {
        info!(
            file = source.original_name,
            existing = %existing,
            "duplicate content, skipping"
        );
        remove_candidate_files(&final_path, &thumbnail_path, &thumbnail_webp_path, state);
        return Ok(FileOutcome::Duplicate);
    }

    let record = MediaFile {
        guid: Uuid::new_v4(),
        filename: source.original_name.to_string(),
        stored_filename,
        file_path: relative_path,
        kind: inspection.kind,
        mime_type,
        file_size: file_size as i64,
        file_hash,
        thumbnail_path,
        thumbnail_webp_path,
        rotation,
        title: source.title.clone().filter(|t| !t.is_empty()),
        description: source
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .or(merged.description.clone()),
        captured_at: merged.captured_at,
        latitude: merged.latitude,
        longitude: merged.longitude,
        location_name,
        camera_make: merged.camera_make.clone(),
        camera_model: merged.camera_model.clone(),
        people: merged.people.clone(),
        has_sidecar_metadata: merged.has_sidecar,
    };

    media::insert_media_file(&state.db, &record).await?;
    info!(
        file = source.original_name,
        guid = %record.guid,
        kind = record.kind.as_str(),
        "media file ingested"
    );

    Ok(FileOutcome::Imported(record.guid))
}

fn remove_candidate_files(
    final_path: &PathBuf,
    thumbnail_path: &Option<String>,
    thumbnail_webp_path: &Option<String>,
    state: &AppState,
) {
    if let Err(e) = fs::remove_file(final_path) {
        warn!(path = %final_path.display(), error = %e, "could not remove duplicate file");
    }
    for relative in [thumbnail_path, thumbnail_webp_path].into_iter().flatten() {
        // Only thumbnails under the media tree are ours to delete; an
        // unconverted HEIC records its own path here
        if relative.starts_with("media/thumbnails/") {
            let _ = fs::remove_file(state.layout.root().join(relative));
        }
    }
}
