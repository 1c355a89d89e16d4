//! Album persistence and membership

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Album {
    pub guid: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub cover_media_id: Option<Uuid>,
    pub media_count: i64,
}

pub async fn create_album(
    pool: &SqlitePool,
    title: &str,
    description: Option<&str>,
) -> Result<Uuid> {
    let guid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO albums (guid, title, description, media_count, created_at, updated_at)
        VALUES (?, ?, ?, 0, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(guid.to_string())
    .bind(title)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(guid)
}

/// Append one asset to an album. Repeat additions of the same pair are
/// ignored; the denormalized count is refreshed either way.
pub async fn add_media_to_album(
    pool: &SqlitePool,
    album_id: Uuid,
    media_id: Uuid,
    display_order: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO album_media (album_id, media_id, display_order, added_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(album_id, media_id) DO NOTHING
        "#,
    )
    .bind(album_id.to_string())
    .bind(media_id.to_string())
    .bind(display_order)
    .execute(pool)
    .await?;

    update_media_count(pool, album_id).await
}

pub async fn update_media_count(pool: &SqlitePool, album_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE albums
        SET media_count = (SELECT COUNT(*) FROM album_media WHERE album_id = ?),
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(album_id.to_string())
    .bind(album_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Auto-select the album cover: first image by display order, falling
/// back to the first member of any kind.
pub async fn refresh_cover(pool: &SqlitePool, album_id: Uuid) -> Result<()> {
    let cover: Option<String> = sqlx::query_scalar(
        r#"
        SELECT m.guid
        FROM media_files m
        INNER JOIN album_media r ON m.guid = r.media_id
        WHERE r.album_id = ? AND m.file_type = 'image'
        ORDER BY r.display_order ASC, r.added_at ASC
        LIMIT 1
        "#,
    )
    .bind(album_id.to_string())
    .fetch_optional(pool)
    .await?;

    let cover = match cover {
        Some(c) => Some(c),
        None => {
            sqlx::query_scalar(
                r#"
                SELECT m.guid
                FROM media_files m
                INNER JOIN album_media r ON m.guid = r.media_id
                WHERE r.album_id = ?
                ORDER BY r.display_order ASC, r.added_at ASC
                LIMIT 1
                "#,
            )
            .bind(album_id.to_string())
            .fetch_optional(pool)
            .await?
        }
    };

    if let Some(cover) = cover {
        sqlx::query("UPDATE albums SET cover_media_id = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?")
            .bind(cover)
            .bind(album_id.to_string())
            .execute(pool)
            .await?;
    }

    Ok(())
}

pub async fn load_album(pool: &SqlitePool, album_id: Uuid) -> Result<Option<Album>> {
    let row = sqlx::query(
        "SELECT guid, title, description, cover_media_id, media_count FROM albums WHERE guid = ?",
    )
    .bind(album_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let guid_str: String = row.get("guid");
    let cover: Option<String> = row.get("cover_media_id");

    Ok(Some(Album {
        guid: Uuid::parse_str(&guid_str)?,
        title: row.get("title"),
        description: row.get("description"),
        cover_media_id: cover.as_deref().and_then(|c| Uuid::parse_str(c).ok()),
        media_count: row.get("media_count"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::{insert_media_file, MediaFile};
    use crate::services::inspect::MediaKind;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        pictor_common::db::init::create_media_files_table(&pool)
            .await
            .unwrap();
        pictor_common::db::init::create_albums_table(&pool)
            .await
            .unwrap();
        pictor_common::db::init::create_album_media_table(&pool)
            .await
            .unwrap();
        pool
    }

    fn media(kind: MediaKind, hash: &str) -> MediaFile {
        MediaFile {
            guid: Uuid::new_v4(),
            filename: format!("{}.bin", hash),
            stored_filename: format!("{}.bin", hash),
            file_path: format!("media/{}.bin", hash),
            kind,
            mime_type: "image/jpeg".to_string(),
            file_size: 1,
            file_hash: hash.to_string(),
            thumbnail_path: None,
            thumbnail_webp_path: None,
            rotation: 0,
            title: None,
            description: None,
            captured_at: None,
            latitude: None,
            longitude: None,
            location_name: None,
            camera_make: None,
            camera_model: None,
            people: Vec::new(),
            has_sidecar_metadata: false,
        }
    }

    #[tokio::test]
    async fn membership_updates_count_and_ignores_repeats() {
        let pool = test_pool().await;
        let album = create_album(&pool, "Trip", None).await.unwrap();

        let a = media(MediaKind::Image, "a");
        insert_media_file(&pool, &a).await.unwrap();

        add_media_to_album(&pool, album, a.guid, 0).await.unwrap();
        add_media_to_album(&pool, album, a.guid, 1).await.unwrap();

        let loaded = load_album(&pool, album).await.unwrap().unwrap();
        assert_eq!(loaded.media_count, 1);
    }

    #[tokio::test]
    async fn cover_prefers_first_image_over_video() {
        let pool = test_pool().await;
        let album = create_album(&pool, "Trip", None).await.unwrap();

        let video = media(MediaKind::Video, "v");
        let image = media(MediaKind::Image, "i");
        insert_media_file(&pool, &video).await.unwrap();
        insert_media_file(&pool, &image).await.unwrap();

        // Video sorts first by display order, but the image wins the cover
        add_media_to_album(&pool, album, video.guid, 0).await.unwrap();
        add_media_to_album(&pool, album, image.guid, 1).await.unwrap();
        refresh_cover(&pool, album).await.unwrap();

        let loaded = load_album(&pool, album).await.unwrap().unwrap();
        assert_eq!(loaded.cover_media_id, Some(image.guid));
    }

    #[tokio::test]
    async fn cover_falls_back_to_video_when_no_images() {
        let pool = test_pool().await;
        let album = create_album(&pool, "Clips", None).await.unwrap();

        let video = media(MediaKind::Video, "v2");
        insert_media_file(&pool, &video).await.unwrap();
        add_media_to_album(&pool, album, video.guid, 0).await.unwrap();
        refresh_cover(&pool, album).await.unwrap();

        let loaded = load_album(&pool, album).await.unwrap().unwrap();
        assert_eq!(loaded.cover_media_id, Some(video.guid));
    }
}
