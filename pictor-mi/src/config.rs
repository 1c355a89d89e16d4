//! Ingest limits and tunables
//!
//! Defaults match the ceilings the upload clients are built around. Every
//! limit can be overridden from the `[ingest]` table of the config file or
//! a `PICTOR_*` environment variable (used by tests).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Ceiling for a single direct upload (finalize path)
    pub max_upload_bytes: u64,
    /// Ceiling for an uploaded archive file (compressed size)
    pub max_archive_bytes: u64,
    /// Ceiling for a single file inside an archive
    pub max_archive_member_bytes: u64,
    /// Ceiling for the summed uncompressed size of all archive entries
    pub max_uncompressed_bytes: u64,
    /// Thumbnail target width in pixels
    pub thumbnail_width: u32,
    /// Thumbnail JPEG/WebP quality (0-100)
    pub thumbnail_quality: u8,
    /// Emit a WebP sibling next to each JPEG thumbnail
    pub webp_thumbnails: bool,
    /// Reverse-geocode GPS coordinates during imports
    pub geocode_on_import: bool,
    /// Concurrent per-file tasks inside one archive import
    pub import_concurrency: usize,
    /// Scratch directories older than this are reclaimed by the sweep
    pub scratch_max_age_hours: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            max_archive_bytes: 5 * 1024 * 1024 * 1024,
            max_archive_member_bytes: 500 * 1024 * 1024,
            max_uncompressed_bytes: 20 * 1024 * 1024 * 1024,
            thumbnail_width: 400,
            thumbnail_quality: 85,
            webp_thumbnails: true,
            geocode_on_import: true,
            import_concurrency: 4,
            scratch_max_age_hours: 24,
        }
    }
}

impl IngestConfig {
    /// Defaults with environment overrides applied.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_u64("PICTOR_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = v;
        }
        if let Some(v) = env_u64("PICTOR_MAX_ARCHIVE_BYTES") {
            config.max_archive_bytes = v;
        }
        if let Some(v) = env_u64("PICTOR_MAX_UNCOMPRESSED_BYTES") {
            config.max_uncompressed_bytes = v;
        }
        if let Ok(v) = std::env::var("PICTOR_GEOCODE_ON_IMPORT") {
            config.geocode_on_import = v != "0" && !v.eq_ignore_ascii_case("false");
        }

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = IngestConfig::default();
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_archive_member_bytes, 500 * 1024 * 1024);
        assert!(config.max_uncompressed_bytes > config.max_archive_bytes);
        assert_eq!(config.thumbnail_width, 400);
    }

    #[test]
    fn toml_table_deserializes() {
        let config: IngestConfig =
            toml::from_str("max_upload_bytes = 1024\nthumbnail_width = 200\n").unwrap();
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.thumbnail_width, 200);
        // untouched fields keep their defaults
        assert_eq!(config.thumbnail_quality, 85);
    }
}
