//! Archive import history

use crate::models::ImportStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub guid: Uuid,
    pub album_id: Option<Uuid>,
    pub archive_name: String,
    pub archive_size: i64,
    pub total_files: i64,
    pub imported_files: i64,
    pub failed_files: i64,
    pub status: ImportStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Record the start of an archive import.
pub async fn create_batch(
    pool: &SqlitePool,
    album_id: Uuid,
    archive_name: &str,
    archive_size: i64,
    total_files: i64,
) -> Result<Uuid> {
    let guid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO import_history (
            guid, album_id, archive_name, archive_size, total_files,
            imported_files, failed_files, status, started_at
        ) VALUES (?, ?, ?, ?, ?, 0, 0, 'processing', ?)
        "#,
    )
    .bind(guid.to_string())
    .bind(album_id.to_string())
    .bind(archive_name)
    .bind(archive_size)
    .bind(total_files)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(guid)
}

pub async fn complete_batch(
    pool: &SqlitePool,
    batch_id: Uuid,
    imported: i64,
    failed: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_history
        SET imported_files = ?, failed_files = ?, status = 'completed', completed_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(imported)
    .bind(failed)
    .bind(Utc::now().to_rfc3339())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fail_batch(pool: &SqlitePool, batch_id: Uuid, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_history
        SET status = 'failed', error_message = ?, completed_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Startup reconciliation: a batch still `processing` was interrupted by
/// a crash or forced termination and will never finish; mark it failed so
/// the history view tells the truth.
pub async fn fail_stale_batches(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE import_history
        SET status = 'failed',
            error_message = 'Interrupted before completion (service restart)',
            completed_at = ?
        WHERE status = 'processing'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<ImportBatch>> {
    let row = sqlx::query(
        r#"
        SELECT guid, album_id, archive_name, archive_size, total_files,
               imported_files, failed_files, status, error_message,
               started_at, completed_at
        FROM import_history
        WHERE guid = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let guid_str: String = row.get("guid");
    let album_id: Option<String> = row.get("album_id");
    let status: String = row.get("status");
    let status = match status.as_str() {
        "completed" => ImportStatus::Completed,
        "failed" => ImportStatus::Failed,
        _ => ImportStatus::Processing,
    };

    let started_at: String = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(Some(ImportBatch {
        guid: Uuid::parse_str(&guid_str)?,
        album_id: album_id.as_deref().and_then(|a| Uuid::parse_str(a).ok()),
        archive_name: row.get("archive_name"),
        archive_size: row.get("archive_size"),
        total_files: row.get("total_files"),
        imported_files: row.get("imported_files"),
        failed_files: row.get("failed_files"),
        status,
        error_message: row.get("error_message"),
        started_at: DateTime::parse_from_rfc3339(&started_at)?.with_timezone(&Utc),
        completed_at: completed_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }))
}
