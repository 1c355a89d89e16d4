//! Archive extraction with decompression-bomb and zip-slip protection

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Extensions the gallery can display; everything else in an archive is
/// ignored rather than rejected.
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "mp4", "mov", "avi", "mpeg",
];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot open archive: {0}")]
    Open(String),

    #[error("Uncompressed size {total} exceeds the {limit} byte ceiling")]
    TooLarge { total: u64, limit: u64 },

    #[error("Archive entry escapes the extraction directory: {0}")]
    UnsafeEntry(String),

    #[error("Extraction failed: {0}")]
    Io(#[from] io::Error),

    #[error("Archive is corrupt: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Extract `archive_path` into `extract_dir`, which is created here only
/// after the bomb check passes. Returns the number of entries written.
pub fn extract_archive(
    archive_path: &Path,
    extract_dir: &Path,
    max_uncompressed: u64,
) -> Result<usize, ArchiveError> {
    let file =
        File::open(archive_path).map_err(|e| ArchiveError::Open(e.to_string()))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ArchiveError::Open(e.to_string()))?;

    // Bomb guard: sum the declared uncompressed sizes before writing
    // anything to disk.
    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        total = total.saturating_add(entry.size());
    }
    if total > max_uncompressed {
        return Err(ArchiveError::TooLarge {
            total,
            limit: max_uncompressed,
        });
    }

    info!(
        entries = archive.len(),
        uncompressed_bytes = total,
        "extracting archive"
    );

    fs::create_dir_all(extract_dir)?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ArchiveError::UnsafeEntry(entry.name().to_string()));
        };
        let target = extract_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    Ok(extracted)
}

/// Walk an extraction directory and return every candidate media file,
/// skipping macOS resource forks and Finder metadata. Sorted so import
/// order is deterministic.
pub fn collect_media_files(extract_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(extract_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("error walking extraction dir: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| is_media_candidate(path))
        .collect();

    files.sort();
    files
}

fn is_media_candidate(path: &Path) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
        return false;
    };
    if !MEDIA_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }

    // Platform artifacts bundled by macOS zip exports
    if path
        .components()
        .any(|c| c.as_os_str() == "__MACOSX")
    {
        return false;
    }
    if path
        .file_name()
        .map(|n| n == ".DS_Store")
        .unwrap_or(false)
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("a.zip");
        build_zip(
            &zip_path,
            &[
                ("photos/one.jpg", b"one"),
                ("photos/deep/two.png", b"two"),
                ("notes.txt", b"irrelevant"),
            ],
        );

        let extract_dir = dir.path().join("out");
        let extracted = extract_archive(&zip_path, &extract_dir, 1024 * 1024).unwrap();
        assert_eq!(extracted, 3);
        assert_eq!(
            fs::read(extract_dir.join("photos/deep/two.png")).unwrap(),
            b"two"
        );
    }

    #[test]
    fn bomb_is_rejected_before_any_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("bomb.zip");
        build_zip(&zip_path, &[("big.jpg", &[0u8; 4096])]);

        let extract_dir = dir.path().join("out");
        let err = extract_archive(&zip_path, &extract_dir, 1024).unwrap_err();
        assert!(matches!(err, ArchiveError::TooLarge { .. }));
        // Nothing was created on disk
        assert!(!extract_dir.exists());
    }

    #[test]
    fn entry_escaping_the_extraction_dir_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("slip.zip");
        build_zip(&zip_path, &[("../evil.jpg", b"payload")]);

        let extract_dir = dir.path().join("out");
        let err = extract_archive(&zip_path, &extract_dir, 1024 * 1024).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafeEntry(_)));
        assert!(!dir.path().join("evil.jpg").exists());
    }

    #[test]
    fn media_walk_filters_artifacts_and_non_media() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("album/__MACOSX")).unwrap();
        fs::write(root.join("album/one.jpg"), b"x").unwrap();
        fs::write(root.join("album/two.MOV"), b"x").unwrap();
        fs::write(root.join("album/.DS_Store"), b"x").unwrap();
        fs::write(root.join("album/__MACOSX/one.jpg"), b"x").unwrap();
        fs::write(root.join("album/readme.txt"), b"x").unwrap();

        let files = collect_media_files(root);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["one.jpg", "two.MOV"]);
    }
}
