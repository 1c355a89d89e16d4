//! Archive preview, commit and progress handlers

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::ImportProgress;
use crate::workflow::{
    self,
    import::{PersonStat, PreviewFileInfo},
    CommitOptions,
};
use crate::AppState;

/// Comma-separated people filter as sent by the import dialog.
fn parse_people_filter(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// POST /import/preview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub file_identifier: String,
    #[serde(default)]
    pub people_filter: Option<String>,
}

/// POST /import/preview response
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub total_files: usize,
    pub matched_files: Vec<PreviewFileInfo>,
    pub filtered_files: Vec<PreviewFileInfo>,
    pub files_without_metadata: Vec<PreviewFileInfo>,
    pub matched_count: usize,
    pub filtered_count: usize,
    pub no_metadata_count: usize,
    pub has_people_filter: bool,
    pub people_stats: Vec<PersonStat>,
    pub people_count: usize,
}

/// POST /import/preview
pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    if request.file_identifier.is_empty() {
        return Err(ApiError::BadRequest(
            "fileIdentifier is required".to_string(),
        ));
    }

    let people_filter = parse_people_filter(request.people_filter.as_deref());
    let has_people_filter = !people_filter.is_empty();

    let summary =
        workflow::run_archive_preview(&state, &request.file_identifier, people_filter).await?;

    Ok(Json(PreviewResponse {
        success: true,
        total_files: summary.total_files,
        matched_count: summary.matched_files.len(),
        filtered_count: summary.filtered_files.len(),
        no_metadata_count: summary.files_without_metadata.len(),
        matched_files: summary.matched_files,
        filtered_files: summary.filtered_files,
        files_without_metadata: summary.files_without_metadata,
        has_people_filter,
        people_count: summary.people_stats.len(),
        people_stats: summary.people_stats,
    }))
}

/// POST /import/commit request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub file_identifier: String,
    #[serde(default)]
    pub album_title: Option<String>,
    #[serde(default)]
    pub album_description: Option<String>,
    #[serde(default)]
    pub people_filter: Option<String>,
}

/// POST /import/commit response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub success: bool,
    pub album_id: Uuid,
    pub history_id: Uuid,
    pub imported_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
}

/// POST /import/commit
///
/// Runs the whole batch inside this request: the single-node design
/// trades request latency for orchestration simplicity, and the client
/// polls `/import/progress/:id` from a second connection.
pub async fn commit(
    State(state): State<AppState>,
    Json(request): Json<CommitRequest>,
) -> ApiResult<Json<CommitResponse>> {
    if request.file_identifier.is_empty() {
        return Err(ApiError::BadRequest(
            "fileIdentifier is required".to_string(),
        ));
    }

    let summary = workflow::run_archive_commit(
        &state,
        &request.file_identifier,
        CommitOptions {
            album_title: request.album_title,
            album_description: request.album_description,
            people_filter: parse_people_filter(request.people_filter.as_deref()),
        },
    )
    .await?;

    Ok(Json(CommitResponse {
        success: true,
        album_id: summary.album_id,
        history_id: summary.history_id,
        imported_count: summary.imported,
        failed_count: summary.failed,
        total_count: summary.total,
    }))
}

/// GET /import/progress/:id response
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub success: bool,
    pub progress: ImportProgress,
}

/// GET /import/progress/:id
pub async fn progress(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> ApiResult<Json<ProgressResponse>> {
    let snapshot = state
        .progress
        .get(import_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Import progress not found: {}", import_id)))?;

    Ok(Json(ProgressResponse {
        success: true,
        progress: snapshot,
    }))
}

/// Build archive import routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/preview", post(preview))
        .route("/import/commit", post(commit))
        .route("/import/progress/:import_id", get(progress))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn people_filter_splits_and_trims() {
        assert_eq!(
            parse_people_filter(Some("Alice, Bob ,,Carol")),
            vec!["Alice", "Bob", "Carol"]
        );
        assert!(parse_people_filter(Some("")).is_empty());
        assert!(parse_people_filter(None).is_empty());
    }
}
