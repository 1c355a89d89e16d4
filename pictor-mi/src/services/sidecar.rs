//! Sidecar metadata matching and parsing
//!
//! Photo-service exports (Google Photos Takeout among others) ship one
//! JSON document per media file, matched by filename convention. The
//! sidecar may live next to the file or in a different subdirectory of
//! the same archive, so matching falls back to a recursive scan.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Parsed sidecar content for one media file
#[derive(Debug, Clone, Default)]
pub struct SidecarMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub description: Option<String>,
    /// People tagged on this item by the exporting service
    pub people: Vec<String>,
    /// Camera make hint derived from the uploading device type
    pub camera_make: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarDoc {
    description: Option<String>,
    #[serde(rename = "photoTakenTime")]
    photo_taken_time: Option<TimeBlock>,
    #[serde(rename = "geoData")]
    geo_data: Option<GeoBlock>,
    #[serde(rename = "geoDataExif")]
    geo_data_exif: Option<GeoBlock>,
    people: Option<Vec<PersonEntry>>,
    #[serde(rename = "googlePhotosOrigin")]
    origin: Option<OriginBlock>,
}

#[derive(Debug, Deserialize)]
struct TimeBlock {
    timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeoBlock {
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PersonEntry {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OriginBlock {
    #[serde(rename = "mobileUpload")]
    mobile_upload: Option<MobileUpload>,
}

#[derive(Debug, Deserialize)]
struct MobileUpload {
    #[serde(rename = "deviceType")]
    device_type: Option<String>,
}

impl GeoBlock {
    /// Exports write 0.0/0.0 when no fix was recorded; treat that as absent.
    fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Locate the sidecar for `media_path`, trying the three filename
/// conventions next to the file first, then the same patterns anywhere
/// under `extract_dir`.
pub fn find_sidecar(media_path: &Path, extract_dir: &Path) -> Option<PathBuf> {
    let dir = media_path.parent()?;
    let base_name = media_path.file_name()?.to_string_lossy().to_string();
    let stem = media_path.file_stem()?.to_string_lossy().to_string();

    let candidates = [
        format!("{}.json", base_name),
        format!("{}.supplemental-metadata.json", base_name),
        format!("{}.json", stem),
    ];

    for candidate in &candidates {
        let path = dir.join(candidate);
        if path.is_file() {
            return Some(path);
        }
    }

    // Some exports place sidecars in a sibling directory; one recursive
    // pass over the extraction tree covers that.
    for entry in WalkDir::new(extract_dir)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if candidates.iter().any(|c| name == c.as_str()) {
            debug!(
                media = %media_path.display(),
                sidecar = %entry.path().display(),
                "sidecar matched by recursive scan"
            );
            return Some(entry.into_path());
        }
    }

    None
}

/// Parse a sidecar document; unreadable or malformed JSON yields `None`.
pub fn parse_sidecar(path: &Path) -> Option<SidecarMetadata> {
    let content = fs::read_to_string(path).ok()?;
    let doc: SidecarDoc = serde_json::from_str(&content).ok()?;

    let captured_at = doc
        .photo_taken_time
        .and_then(|t| t.timestamp)
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0));

    // The exif-flavored block carries the camera's own fix; prefer it over
    // the service-estimated one when both exist.
    let geo = doc
        .geo_data_exif
        .as_ref()
        .filter(|g| g.coordinates().is_some())
        .or(doc.geo_data.as_ref().filter(|g| g.coordinates().is_some()))
        .cloned();

    let (latitude, longitude, altitude) = match geo {
        Some(block) => {
            let (lat, lon) = block.coordinates().unwrap_or((0.0, 0.0));
            (Some(lat), Some(lon), block.altitude)
        }
        None => (None, None, None),
    };

    let people = doc
        .people
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.name)
        .filter(|n| !n.is_empty())
        .collect();

    let camera_make = doc
        .origin
        .and_then(|o| o.mobile_upload)
        .and_then(|m| m.device_type)
        .and_then(|device| {
            if device.contains("IOS") || device.contains("IPHONE") {
                Some("Apple".to_string())
            } else if device.contains("ANDROID") {
                Some("Android".to_string())
            } else {
                None
            }
        });

    let description = doc.description.filter(|d| !d.is_empty());

    Some(SidecarMetadata {
        captured_at,
        latitude,
        longitude,
        altitude,
        description,
        people,
        camera_make,
    })
}

/// Find and parse in one step.
pub fn load_for_media(media_path: &Path, extract_dir: &Path) -> Option<SidecarMetadata> {
    find_sidecar(media_path, extract_dir).and_then(|p| parse_sidecar(&p))
}

/// People filter: an empty target list always passes; otherwise any
/// intersection between tagged and targeted names passes.
pub fn matches_people(people: &[String], targets: &[String]) -> bool {
    if targets.is_empty() {
        return true;
    }
    people.iter().any(|p| targets.iter().any(|t| t == p))
}
