//! Format and safety inspection
//!
//! Classifies an upload as image or video from its MIME type and detects
//! HEIC/HEIF input. Detection is three-tiered: file extension, declared
//! MIME type, and a binary signature probe; the probe is what settles
//! generic `application/octet-stream` uploads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Allowed image MIME types. `application/octet-stream` is accepted here
/// because HEIC files commonly sniff as it; the signature probe decides.
const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "image/heif",
    "application/octet-stream",
];

const VIDEO_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/mpeg",
];

const HEIC_MIME_TYPES: &[&str] = &[
    "image/heic",
    "image/heif",
    "image/heic-sequence",
    "image/heif-sequence",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Result of inspecting one file
#[derive(Debug, Clone)]
pub struct Inspection {
    pub kind: MediaKind,
    pub mime_type: String,
    pub is_heic: bool,
}

/// Classify a file, or `None` when the format is not supported.
///
/// `declared_mime` is the type recorded at assembly time when present;
/// otherwise the content is sniffed here.
pub fn inspect(path: &Path, declared_mime: Option<&str>, file_name: &str) -> Option<Inspection> {
    let mime = match declared_mime {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => sniff_mime(path),
    };

    let is_heic = is_heic_file(path, &mime, file_name);

    if VIDEO_MIME_TYPES.contains(&mime.as_str()) {
        return Some(Inspection {
            kind: MediaKind::Video,
            mime_type: mime,
            is_heic: false,
        });
    }

    if IMAGE_MIME_TYPES.contains(&mime.as_str()) || is_heic {
        return Some(Inspection {
            kind: MediaKind::Image,
            mime_type: mime,
            is_heic,
        });
    }

    None
}

/// Content-based MIME sniffing, falling back to the extension.
pub fn sniff_mime(path: &Path) -> String {
    if let Ok(Some(kind)) = infer::get_from_path(path) {
        return kind.mime_type().to_string();
    }
    mime_from_extension(path).to_string()
}

fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mpeg" | "mpg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Three-tier HEIC detection: extension, MIME type, binary signature.
pub fn is_heic_file(path: &Path, mime: &str, file_name: &str) -> bool {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext == "heic" || ext == "heif" {
        return true;
    }

    if HEIC_MIME_TYPES.contains(&mime) {
        return true;
    }

    // Signature probe settles generic octet-stream uploads
    if mime == "application/octet-stream" {
        return probe_heic_signature(path);
    }

    false
}

/// Read the ftyp brand area and look for the HEIF family markers.
///
/// ISO-BMFF files carry `ftyp` at offset 4 followed by the major brand;
/// `heic`, `heif` and `mif1` all identify HEIF stills.
pub fn probe_heic_signature(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    if file.seek(SeekFrom::Start(4)).is_err() {
        return false;
    }
    let mut buf = [0u8; 8];
    if file.read_exact(&mut buf).is_err() {
        return false;
    }

    [&b"heic"[..], &b"heif"[..], &b"mif1"[..]]
        .iter()
        .any(|marker| buf.windows(4).any(|w| w == *marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_heic_header(dir: &tempfile::TempDir, name: &str, brand: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        // 4-byte box size, "ftyp", brand, minor version
        file.write_all(&[0, 0, 0, 24]).unwrap();
        file.write_all(b"ftyp").unwrap();
        file.write_all(brand).unwrap();
        file.write_all(&[0, 0, 0, 0]).unwrap();
        path
    }

    #[test]
    fn signature_probe_detects_heif_brands() {
        let dir = tempfile::tempdir().unwrap();
        for brand in [&b"heic"[..], &b"heif"[..], &b"mif1"[..]] {
            let path = write_heic_header(&dir, "probe.bin", brand);
            assert!(probe_heic_signature(&path));
        }

        let other = dir.path().join("not_heic.bin");
        std::fs::write(&other, b"\x00\x00\x00\x18ftypisom\x00\x00\x00\x00").unwrap();
        assert!(!probe_heic_signature(&other));
    }

    #[test]
    fn octet_stream_with_heic_signature_classifies_as_heic_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_heic_header(&dir, "photo.bin", b"heic");

        let inspection = inspect(&path, Some("application/octet-stream"), "photo.bin").unwrap();
        assert_eq!(inspection.kind, MediaKind::Image);
        assert!(inspection.is_heic);
    }

    #[test]
    fn extension_alone_marks_heic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_1234.HEIC");
        std::fs::write(&path, b"junk").unwrap();
        assert!(is_heic_file(&path, "application/octet-stream", "IMG_1234.HEIC"));
    }

    #[test]
    fn video_mime_classifies_as_video() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"junk").unwrap();
        let inspection = inspect(&path, Some("video/mp4"), "clip.mp4").unwrap();
        assert_eq!(inspection.kind, MediaKind::Video);
        assert!(!inspection.is_heic);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        assert!(inspect(&path, Some("application/pdf"), "doc.pdf").is_none());
    }
}
