//! Chunk upload and finalize handlers

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::services::chunks::ChunkError;
use crate::workflow::{finalize_upload, FinalizeOptions};
use crate::AppState;

/// POST /upload/chunk response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub success: bool,
    pub complete: bool,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<usize>,
}

/// POST /upload/chunk
///
/// Multipart fields: `chunkIndex`, `totalChunks`, `fileName`,
/// `fileIdentifier` and the binary `chunk` part.
pub async fn receive_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkResponse>> {
    let mut chunk_index: Option<usize> = None;
    let mut total_chunks: usize = 1;
    let mut file_name = String::new();
    let mut identifier = String::new();
    let mut chunk_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chunkIndex" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                chunk_index = text.trim().parse().ok();
            }
            "totalChunks" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                total_chunks = text.trim().parse().unwrap_or(1);
            }
            "fileName" => {
                file_name = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            }
            "fileIdentifier" => {
                identifier = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            }
            "chunk" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Chunk body unreadable: {}", e)))?;
                chunk_bytes = Some(bytes.to_vec());
            }
            other => debug!(field = %other, "ignoring unknown multipart field"),
        }
    }

    let chunk_index =
        chunk_index.ok_or_else(|| ApiError::BadRequest("chunkIndex is required".to_string()))?;
    let chunk_bytes =
        chunk_bytes.ok_or_else(|| ApiError::BadRequest("chunk part is required".to_string()))?;

    let receipt = state
        .chunks
        .receive_chunk(&identifier, chunk_index, total_chunks, &file_name, &chunk_bytes)
        .await
        .map_err(|e| match e {
            ChunkError::AlreadyAssembled(id) => {
                ApiError::Conflict(format!("Upload {} already completed", id))
            }
            ChunkError::Io(err) => ApiError::Io(err),
            other => ApiError::BadRequest(other.to_string()),
        })?;

    Ok(Json(ChunkResponse {
        success: true,
        complete: receipt.complete,
        chunk_index,
        total_chunks: receipt.total,
        uploaded_chunks: (!receipt.complete).then_some(receipt.received),
    }))
}

/// POST /upload/finalize request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub file_identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Client-extracted EXIF as a JSON document
    #[serde(default)]
    pub exif_data: Option<String>,
    /// Base64 poster frame for videos
    #[serde(default)]
    pub thumbnail_data: Option<String>,
}

/// POST /upload/finalize response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    pub file_id: uuid::Uuid,
}

/// POST /upload/finalize
pub async fn finalize(
    State(state): State<AppState>,
    Json(request): Json<FinalizeRequest>,
) -> ApiResult<Json<FinalizeResponse>> {
    if request.file_identifier.is_empty() {
        return Err(ApiError::BadRequest(
            "fileIdentifier is required".to_string(),
        ));
    }

    let file_id = finalize_upload(
        &state,
        &request.file_identifier,
        FinalizeOptions {
            title: request.title,
            description: request.description,
            exif_data: request.exif_data,
            thumbnail_data: request.thumbnail_data,
        },
    )
    .await?;

    Ok(Json(FinalizeResponse {
        success: true,
        file_id,
    }))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload/chunk", post(receive_chunk))
        .route("/upload/finalize", post(finalize))
}
