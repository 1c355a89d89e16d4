//! Metadata merge policy
//!
//! When both a sidecar document and embedded metadata exist, sidecar
//! values win field by field and embedded values fill whatever the
//! sidecar left unset.

use crate::extractors::exif::ImageMetadata;
use crate::extractors::video::VideoMetadata;
use crate::services::sidecar::SidecarMetadata;
use chrono::{DateTime, Utc};

/// Metadata read out of the media file itself, image or video.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub orientation: u32,
}

impl From<ImageMetadata> for EmbeddedMetadata {
    fn from(m: ImageMetadata) -> Self {
        Self {
            captured_at: m.captured_at,
            latitude: m.latitude,
            longitude: m.longitude,
            camera_make: m.camera_make,
            camera_model: m.camera_model,
            orientation: m.orientation,
        }
    }
}

impl From<VideoMetadata> for EmbeddedMetadata {
    fn from(m: VideoMetadata) -> Self {
        Self {
            captured_at: m.captured_at,
            latitude: m.latitude,
            longitude: m.longitude,
            camera_make: m.camera_make,
            camera_model: m.camera_model,
            orientation: 1,
        }
    }
}

/// The merged view the persistence writer stores.
#[derive(Debug, Clone, Default)]
pub struct MediaMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub people: Vec<String>,
    pub has_sidecar: bool,
    pub orientation: u32,
}

pub fn merge_metadata(
    sidecar: Option<&SidecarMetadata>,
    embedded: &EmbeddedMetadata,
) -> MediaMetadata {
    let Some(sidecar) = sidecar else {
        return MediaMetadata {
            captured_at: embedded.captured_at,
            latitude: embedded.latitude,
            longitude: embedded.longitude,
            description: None,
            camera_make: embedded.camera_make.clone(),
            camera_model: embedded.camera_model.clone(),
            people: Vec::new(),
            has_sidecar: false,
            orientation: embedded.orientation,
        };
    };

    MediaMetadata {
        captured_at: sidecar.captured_at.or(embedded.captured_at),
        latitude: sidecar.latitude.or(embedded.latitude),
        longitude: sidecar.longitude.or(embedded.longitude),
        description: sidecar.description.clone(),
        camera_make: sidecar
            .camera_make
            .clone()
            .or_else(|| embedded.camera_make.clone()),
        camera_model: embedded.camera_model.clone(),
        people: sidecar.people.clone(),
        has_sidecar: true,
        orientation: embedded.orientation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn embedded() -> EmbeddedMetadata {
        EmbeddedMetadata {
            captured_at: Some(Utc.with_ymd_and_hms(2020, 5, 1, 8, 0, 0).unwrap()),
            latitude: Some(10.0),
            longitude: Some(20.0),
            camera_make: Some("Canon".to_string()),
            camera_model: Some("EOS R5".to_string()),
            orientation: 6,
        }
    }

    #[test]
    fn sidecar_wins_field_by_field() {
        let sidecar = SidecarMetadata {
            captured_at: Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
            latitude: Some(35.0),
            longitude: Some(139.0),
            description: Some("note".to_string()),
            people: vec!["Alice".to_string()],
            ..Default::default()
        };

        let merged = merge_metadata(Some(&sidecar), &embedded());
        assert_eq!(merged.latitude, Some(35.0));
        assert_eq!(merged.captured_at.unwrap().to_rfc3339(), "2021-01-01T00:00:00+00:00");
        // fields the sidecar left unset fall back to embedded values
        assert_eq!(merged.camera_make.as_deref(), Some("Canon"));
        assert_eq!(merged.camera_model.as_deref(), Some("EOS R5"));
        assert!(merged.has_sidecar);
        assert_eq!(merged.orientation, 6);
    }

    #[test]
    fn no_sidecar_passes_embedded_through() {
        let merged = merge_metadata(None, &embedded());
        assert_eq!(merged.latitude, Some(10.0));
        assert!(!merged.has_sidecar);
        assert!(merged.people.is_empty());
    }

    #[test]
    fn sidecar_gaps_fill_from_embedded() {
        let sidecar = SidecarMetadata {
            description: Some("only a note".to_string()),
            ..Default::default()
        };

        let merged = merge_metadata(Some(&sidecar), &embedded());
        assert_eq!(merged.latitude, Some(10.0));
        assert_eq!(merged.longitude, Some(20.0));
        assert!(merged.captured_at.is_some());
        assert!(merged.has_sidecar);
    }
}
