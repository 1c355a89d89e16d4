//! Shared fixtures for integration tests

use image::{ImageBuffer, Rgb};
use pictor_common::config::StorageLayout;
use pictor_mi::services::Tools;
use pictor_mi::{AppState, IngestConfig};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// App state over a temporary storage root and file-backed catalog.
/// Geocoding is disabled so tests never touch the network.
pub async fn test_state(dir: &TempDir) -> AppState {
    test_state_with_config(dir, {
        let mut config = IngestConfig::default();
        config.geocode_on_import = false;
        config
    })
    .await
}

pub async fn test_state_with_config(dir: &TempDir, config: IngestConfig) -> AppState {
    let layout = StorageLayout::new(dir.path().to_path_buf());
    layout.ensure_directories().unwrap();

    let pool = pictor_mi::db::init_database_pool(&layout.database_path())
        .await
        .unwrap();

    AppState::new(pool, layout, config, Tools::none())
}

/// Tiny valid PNG whose bytes depend on the color, so distinct colors
/// produce distinct content hashes.
pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(8, 8, Rgb(color));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Build a zip archive in memory.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Push an archive through the chunk receiver in one piece so the
/// registry holds a real assembled upload.
pub async fn register_archive(state: &AppState, identifier: &str, name: &str, bytes: &[u8]) {
    let receipt = state
        .chunks
        .receive_chunk(identifier, 0, 1, name, bytes)
        .await
        .unwrap();
    assert!(receipt.complete);
}

/// Minimal sidecar document tagging the given people.
pub fn sidecar_json(people: &[&str]) -> String {
    let tags: Vec<String> = people
        .iter()
        .map(|p| format!(r#"{{ "name": "{}" }}"#, p))
        .collect();
    format!(
        r#"{{
            "photoTakenTime": {{ "timestamp": "1700000000" }},
            "people": [{}]
        }}"#,
        tags.join(",")
    )
}

pub fn media_root_file_count(root: &Path) -> usize {
    walkdir::WalkDir::new(root.join("media"))
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .count()
}
