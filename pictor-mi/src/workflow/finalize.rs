//! Direct upload finalization
//!
//! Consumes an assembled chunked upload: one file through the pipeline,
//! then scratch cleanup. The upload client may pass along EXIF it parsed
//! in the browser and, for videos, a poster frame it rendered.

use crate::error::ApiError;
use crate::extractors::exif::parse_exif_datetime;
use crate::extractors::EmbeddedMetadata;
use crate::workflow::pipeline::{process_media_file, FileOutcome, MediaSource};
use crate::AppState;
use base64::Engine;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct FinalizeOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    /// JSON-encoded EXIF extracted client-side
    pub exif_data: Option<String>,
    /// Base64 (optionally data-URL) poster frame for videos
    pub thumbnail_data: Option<String>,
}

/// Shape of the client-extracted EXIF document
#[derive(Debug, Deserialize)]
struct ClientExif {
    datetime: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    camera_make: Option<String>,
    camera_model: Option<String>,
    orientation: Option<u32>,
}

fn parse_client_exif(json: &str) -> Option<EmbeddedMetadata> {
    let parsed: ClientExif = match serde_json::from_str(json) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "ignoring malformed client EXIF payload");
            return None;
        }
    };

    Some(EmbeddedMetadata {
        captured_at: parsed.datetime.as_deref().and_then(parse_exif_datetime),
        latitude: parsed.latitude,
        longitude: parsed.longitude,
        camera_make: parsed.camera_make,
        camera_model: parsed.camera_model,
        orientation: parsed.orientation.unwrap_or(1),
    })
}

fn decode_client_thumbnail(data: &str) -> Option<Vec<u8>> {
    // Accept both a bare base64 payload and a data URL
    let payload = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
}

/// Finalize one assembled upload into the catalog.
pub async fn finalize_upload(
    state: &AppState,
    identifier: &str,
    options: FinalizeOptions,
) -> Result<Uuid, ApiError> {
    let upload = state
        .uploads
        .get(identifier)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No uploaded file for {}", identifier)))?;

    if upload.size_bytes > state.config.max_upload_bytes {
        return Err(ApiError::TooLarge(format!(
            "File exceeds the {} byte upload ceiling",
            state.config.max_upload_bytes
        )));
    }

    let client_exif = options.exif_data.as_deref().and_then(parse_client_exif);
    let client_thumbnail = options
        .thumbnail_data
        .as_deref()
        .and_then(decode_client_thumbnail);

    let outcome = process_media_file(
        state,
        MediaSource {
            path: &upload.path,
            original_name: &upload.original_name,
            declared_mime: Some(&upload.mime_type),
            title: options.title,
            description: options.description,
            sidecar: None,
            client_exif,
            client_thumbnail,
            move_source: true,
        },
    )
    .await
    .map_err(|e| ApiError::Internal(format!("Upload processing failed: {}", e)))?;

    // The scratch directory is consumed whatever the outcome
    let _ = std::fs::remove_dir_all(&upload.scratch_dir);
    state.uploads.remove(identifier).await;

    match outcome {
        FileOutcome::Imported(guid) => {
            info!(identifier, %guid, "direct upload finalized");
            Ok(guid)
        }
        FileOutcome::Duplicate => Err(ApiError::Conflict(
            "An identical file already exists in the gallery".to_string(),
        )),
        FileOutcome::Rejected(reason) => Err(ApiError::BadRequest(reason)),
    }
}
