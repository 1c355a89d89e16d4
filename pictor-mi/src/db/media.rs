//! Media file persistence and deduplication

use crate::services::inspect::MediaKind;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

/// One ingested media file
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub guid: Uuid,
    /// Original client-side file name
    pub filename: String,
    /// Generated collision-free name on disk
    pub stored_filename: String,
    /// Path relative to the storage root
    pub file_path: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub file_size: i64,
    pub file_hash: String,
    pub thumbnail_path: Option<String>,
    pub thumbnail_webp_path: Option<String>,
    pub rotation: u32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub people: Vec<String>,
    pub has_sidecar_metadata: bool,
}

/// SHA-256 over the stored bytes, streamed so large videos do not load
/// into memory whole.
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Look up an existing asset by content hash (pre-insert dedup check).
pub async fn find_by_hash(pool: &SqlitePool, hash: &str) -> Result<Option<Uuid>> {
    let guid: Option<String> =
        sqlx::query_scalar("SELECT guid FROM media_files WHERE file_hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(pool)
            .await?;

    Ok(match guid {
        Some(g) => Some(Uuid::parse_str(&g)?),
        None => None,
    })
}

/// Insert the full record in one statement.
pub async fn insert_media_file(pool: &SqlitePool, file: &MediaFile) -> Result<()> {
    let people_json = if file.people.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&file.people)?)
    };

    sqlx::query(
        r#"
        INSERT INTO media_files (
            guid, filename, stored_filename, file_path, file_type, mime_type,
            file_size, file_hash, thumbnail_path, thumbnail_webp_path, rotation,
            title, description, captured_at, latitude, longitude, location_name,
            camera_make, camera_model, people, has_sidecar_metadata,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                  CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(file.guid.to_string())
    .bind(&file.filename)
    .bind(&file.stored_filename)
    .bind(&file.file_path)
    .bind(file.kind.as_str())
    .bind(&file.mime_type)
    .bind(file.file_size)
    .bind(&file.file_hash)
    .bind(&file.thumbnail_path)
    .bind(&file.thumbnail_webp_path)
    .bind(file.rotation as i64)
    .bind(&file.title)
    .bind(&file.description)
    .bind(file.captured_at.map(|dt| dt.to_rfc3339()))
    .bind(file.latitude)
    .bind(file.longitude)
    .bind(&file.location_name)
    .bind(&file.camera_make)
    .bind(&file.camera_model)
    .bind(people_json)
    .bind(file.has_sidecar_metadata)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one record, mainly for tests and the cover query.
pub async fn load_media_file(pool: &SqlitePool, guid: Uuid) -> Result<Option<MediaFile>> {
    let row = sqlx::query(
        r#"
        SELECT guid, filename, stored_filename, file_path, file_type, mime_type,
               file_size, file_hash, thumbnail_path, thumbnail_webp_path, rotation,
               title, description, captured_at, latitude, longitude, location_name,
               camera_make, camera_model, people, has_sidecar_metadata
        FROM media_files
        WHERE guid = ?
        "#,
    )
    .bind(guid.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let guid_str: String = row.get("guid");
    let file_type: String = row.get("file_type");
    let kind = if file_type == "video" {
        MediaKind::Video
    } else {
        MediaKind::Image
    };

    let captured_at: Option<String> = row.get("captured_at");
    let captured_at = captured_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let people: Option<String> = row.get("people");
    let people = people
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();

    let rotation: i64 = row.get("rotation");

    Ok(Some(MediaFile {
        guid: Uuid::parse_str(&guid_str)?,
        filename: row.get("filename"),
        stored_filename: row.get("stored_filename"),
        file_path: row.get("file_path"),
        kind,
        mime_type: row.get("mime_type"),
        file_size: row.get("file_size"),
        file_hash: row.get("file_hash"),
        thumbnail_path: row.get("thumbnail_path"),
        thumbnail_webp_path: row.get("thumbnail_webp_path"),
        rotation: rotation as u32,
        title: row.get("title"),
        description: row.get("description"),
        captured_at,
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        location_name: row.get("location_name"),
        camera_make: row.get("camera_make"),
        camera_model: row.get("camera_model"),
        people,
        has_sidecar_metadata: row.get("has_sidecar_metadata"),
    }))
}

pub async fn count_media_files(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_files")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        pictor_common::db::init::create_media_files_table(&pool)
            .await
            .unwrap();
        pool
    }

    fn sample_file(hash: &str) -> MediaFile {
        MediaFile {
            guid: Uuid::new_v4(),
            filename: "IMG_0001.jpg".to_string(),
            stored_filename: "20240101000000_abcd1234.jpg".to_string(),
            file_path: "media/images/20240101000000_abcd1234.jpg".to_string(),
            kind: MediaKind::Image,
            mime_type: "image/jpeg".to_string(),
            file_size: 1234,
            file_hash: hash.to_string(),
            thumbnail_path: Some("media/thumbnails/thumb_x.jpg".to_string()),
            thumbnail_webp_path: None,
            rotation: 90,
            title: None,
            description: Some("desc".to_string()),
            captured_at: Some(Utc::now()),
            latitude: Some(35.65),
            longitude: Some(139.74),
            location_name: None,
            camera_make: Some("Apple".to_string()),
            camera_model: Some("iPhone 14".to_string()),
            people: vec!["Alice".to_string()],
            has_sidecar_metadata: true,
        }
    }

    #[tokio::test]
    async fn insert_and_load_roundtrip() {
        let pool = test_pool().await;
        let file = sample_file("hash-1");
        insert_media_file(&pool, &file).await.unwrap();

        let loaded = load_media_file(&pool, file.guid).await.unwrap().unwrap();
        assert_eq!(loaded.filename, file.filename);
        assert_eq!(loaded.rotation, 90);
        assert_eq!(loaded.people, vec!["Alice"]);
        assert!(loaded.has_sidecar_metadata);
        assert_eq!(loaded.kind, MediaKind::Image);
    }

    #[tokio::test]
    async fn hash_lookup_finds_duplicates() {
        let pool = test_pool().await;
        let file = sample_file("same-hash");
        insert_media_file(&pool, &file).await.unwrap();

        let found = find_by_hash(&pool, "same-hash").await.unwrap();
        assert_eq!(found, Some(file.guid));
        assert!(find_by_hash(&pool, "other-hash").await.unwrap().is_none());
    }

    #[test]
    fn streamed_hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let hash = calculate_file_hash(&path).unwrap();
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
