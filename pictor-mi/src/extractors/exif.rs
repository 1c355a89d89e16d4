//! Embedded EXIF extraction for still images
//!
//! Reads orientation, original-capture timestamp, GPS coordinates and
//! camera identity. Extraction never fails outward: images without EXIF
//! (or with unreadable EXIF) yield defaults.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Embedded metadata of one image
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    /// Raw EXIF orientation value (1 when absent)
    pub orientation: u32,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            captured_at: None,
            latitude: None,
            longitude: None,
            camera_make: None,
            camera_model: None,
            orientation: 1,
        }
    }
}

/// Map an EXIF orientation value onto a display rotation in degrees.
///
/// Mirrored variants collapse onto the unmirrored rotation; unknown
/// values mean no rotation.
pub fn rotation_from_orientation(orientation: u32) -> u32 {
    match orientation {
        3 => 180,
        6 => 90,
        8 => 270,
        _ => 0,
    }
}

/// Read embedded metadata; any failure yields the defaults.
pub fn extract_image_metadata(path: &Path) -> ImageMetadata {
    let Ok(file) = File::open(path) else {
        return ImageMetadata::default();
    };
    let mut reader = BufReader::new(&file);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(path = %path.display(), "no EXIF data: {}", e);
            return ImageMetadata::default();
        }
    };

    let orientation = exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1);

    // DateTimeOriginal is the capture moment; DateTime is a generic
    // modification stamp used as fallback
    let captured_at = ascii_field(&exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_field(&exif, Tag::DateTime))
        .and_then(|s| parse_exif_datetime(&s));

    let latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    let longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);

    let camera_make = ascii_field(&exif, Tag::Make).map(|s| s.trim().to_string());
    let camera_model = ascii_field(&exif, Tag::Model).map(|s| s.trim().to_string());

    ImageMetadata {
        captured_at,
        latitude,
        longitude,
        camera_make,
        camera_model,
        orientation,
    }
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
        _ => None,
    }
}

fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let value_field = exif.get_field(value_tag, In::PRIMARY)?;
    let hemisphere = ascii_field(exif, ref_tag)?;

    match &value_field.value {
        Value::Rational(rationals) => dms_to_decimal(rationals, hemisphere.trim()),
        _ => None,
    }
}

/// Convert degrees/minutes/seconds rationals plus a hemisphere reference
/// to signed decimal degrees: `dd = deg + min/60 + sec/3600`, negated for
/// the southern and western hemispheres.
pub fn dms_to_decimal(dms: &[exif::Rational], hemisphere: &str) -> Option<f64> {
    if dms.len() < 3 {
        return None;
    }

    let component = |r: &exif::Rational| -> Option<f64> {
        if r.denom == 0 {
            return None;
        }
        Some(r.num as f64 / r.denom as f64)
    };

    let degrees = component(&dms[0])?;
    let minutes = component(&dms[1]).unwrap_or(0.0);
    let seconds = component(&dms[2]).unwrap_or(0.0);

    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }

    Some(decimal)
}

/// Convert the EXIF colon-delimited date form ("2024:01:15 14:30:45")
/// to a timestamp. ISO-8601 input is accepted too since client-supplied
/// EXIF arrives that way.
pub fn parse_exif_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim().trim_matches('"');
    if s.is_empty() {
        return None;
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::Rational;

    #[test]
    fn orientation_mapping_is_total_and_fixed() {
        for orientation in [1, 2, 4, 5, 7, 9, 0, 99] {
            assert_eq!(rotation_from_orientation(orientation), 0);
        }
        assert_eq!(rotation_from_orientation(3), 180);
        assert_eq!(rotation_from_orientation(6), 90);
        assert_eq!(rotation_from_orientation(8), 270);
    }

    #[test]
    fn dms_converts_to_decimal_degrees() {
        let dms = [
            Rational { num: 40, denom: 1 },
            Rational { num: 26, denom: 1 },
            Rational {
                num: 4620,
                denom: 100,
            },
        ];

        let north = dms_to_decimal(&dms, "N").unwrap();
        assert!((north - 40.446167).abs() < 1e-6);

        let south = dms_to_decimal(&dms, "S").unwrap();
        assert!((south + 40.446167).abs() < 1e-6);

        let west = dms_to_decimal(&dms, "W").unwrap();
        assert!(west < 0.0);
    }

    #[test]
    fn dms_rejects_short_or_divide_by_zero_degrees() {
        let short = [Rational { num: 40, denom: 1 }];
        assert!(dms_to_decimal(&short, "N").is_none());

        let bad = [
            Rational { num: 40, denom: 0 },
            Rational { num: 0, denom: 1 },
            Rational { num: 0, denom: 1 },
        ];
        assert!(dms_to_decimal(&bad, "N").is_none());
    }

    #[test]
    fn colon_dates_become_timestamps() {
        let dt = parse_exif_datetime("2024:01:15 14:30:45").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T14:30:45+00:00");

        assert!(parse_exif_datetime("2024-01-15 14:30:45").is_some());
        assert!(parse_exif_datetime("2024-01-15T14:30:45Z").is_some());
        assert!(parse_exif_datetime("not a date").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    #[test]
    fn plain_image_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        image::ImageBuffer::from_pixel(4, 4, image::Rgb([0u8, 0, 0]))
            .save(&path)
            .unwrap();

        let meta = extract_image_metadata(&path);
        assert_eq!(meta.orientation, 1);
        assert!(meta.captured_at.is_none());
        assert!(meta.latitude.is_none());
    }
}
