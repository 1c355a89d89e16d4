//! Container-level metadata extraction for videos
//!
//! Shells out to ffprobe for the container creation time, dimensions,
//! duration and the QuickTime vendor tag block phones write
//! (`com.apple.quicktime.*`). When no timestamp exists anywhere the file
//! modification time stands in, so `captured_at` is only absent when even
//! that is unreadable.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Container metadata of one video
#[derive(Debug, Clone, Default)]
pub struct VideoMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub software: Option<String>,
    pub focal_length_35mm: Option<f64>,
    pub location_accuracy: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    streams: Option<Vec<ProbeStream>>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Probe a video; every failure degrades to the mtime fallback.
pub async fn extract_video_metadata(ffprobe: Option<&Path>, path: &Path) -> VideoMetadata {
    let mut metadata = match ffprobe {
        Some(ffprobe) => match probe(ffprobe, path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ffprobe failed");
                VideoMetadata::default()
            }
        },
        None => {
            debug!(path = %path.display(), "ffprobe not installed, container metadata skipped");
            VideoMetadata::default()
        }
    };

    if metadata.captured_at.is_none() {
        metadata.captured_at = modification_time(path);
    }

    metadata
}

async fn probe(ffprobe: &Path, path: &Path) -> anyhow::Result<VideoMetadata> {
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)?;
    let mut metadata = VideoMetadata::default();

    if let Some(format) = &probe.format {
        metadata.duration_seconds = format.duration.as_deref().and_then(|d| d.parse().ok());

        if let Some(tags) = &format.tags {
            metadata.captured_at = tag(tags, "creation_time")
                .and_then(parse_video_datetime)
                .or_else(|| {
                    tag(tags, "com.apple.quicktime.creationdate").and_then(parse_video_datetime)
                });

            metadata.camera_make = tag(tags, "com.apple.quicktime.make").map(str::to_string);
            metadata.camera_model = tag(tags, "com.apple.quicktime.model").map(str::to_string);
            metadata.software = tag(tags, "com.apple.quicktime.software").map(str::to_string);
            metadata.location_accuracy =
                tag(tags, "com.apple.quicktime.location.accuracy.horizontal")
                    .and_then(|v| v.parse().ok());
            metadata.focal_length_35mm =
                tag(tags, "com.apple.quicktime.camera.focal_length.35mm_equivalent")
                    .and_then(|v| v.parse().ok());

            if let Some(position) =
                tag(tags, "com.apple.quicktime.location.ISO6709").and_then(parse_iso6709)
            {
                metadata.latitude = Some(position.0);
                metadata.longitude = Some(position.1);
                metadata.altitude = position.2;
            }
        }
    }

    if let Some(streams) = &probe.streams {
        if let Some(video_stream) = streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
        {
            metadata.width = video_stream.width;
            metadata.height = video_stream.height;
        }
    }

    Ok(metadata)
}

fn tag<'a>(tags: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    if let Some(v) = tags.get(key) {
        return Some(v.as_str());
    }
    // ffprobe key casing varies between muxers
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Parse the compact ISO 6709 positional string
/// `±DD.DDDD±DDD.DDDD±AAA.AAA/` into (lat, lon, altitude).
pub fn parse_iso6709(s: &str) -> Option<(f64, f64, Option<f64>)> {
    let s = s.trim().trim_end_matches('/');
    if s.is_empty() || (!s.starts_with('+') && !s.starts_with('-')) {
        return None;
    }

    // Sign positions delimit the components; the leading sign is skipped
    let mut splits: Vec<usize> = s
        .char_indices()
        .skip(1)
        .filter(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)
        .collect();
    if splits.is_empty() {
        return None;
    }
    splits.push(s.len());

    let lat: f64 = s[..splits[0]].parse().ok()?;
    let lon: f64 = s[splits[0]..splits[1]].parse().ok()?;
    let altitude = if splits.len() > 2 {
        s[splits[1]..splits[2]].parse().ok()
    } else {
        None
    };

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some((lat, lon, altitude))
}

/// Accept the timestamp shapes container tags come in.
fn parse_video_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

fn modification_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso6709_with_altitude() {
        let (lat, lon, alt) = parse_iso6709("+35.6586+139.7454+035.247/").unwrap();
        assert!((lat - 35.6586).abs() < 1e-6);
        assert!((lon - 139.7454).abs() < 1e-6);
        assert!((alt.unwrap() - 35.247).abs() < 1e-6);
    }

    #[test]
    fn iso6709_without_altitude() {
        let (lat, lon, alt) = parse_iso6709("-33.8688+151.2093/").unwrap();
        assert!((lat + 33.8688).abs() < 1e-6);
        assert!((lon - 151.2093).abs() < 1e-6);
        assert!(alt.is_none());
    }

    #[test]
    fn iso6709_rejects_junk() {
        assert!(parse_iso6709("").is_none());
        assert!(parse_iso6709("garbage").is_none());
        assert!(parse_iso6709("+91.0+10.0/").is_none());
        assert!(parse_iso6709("35.6586").is_none());
    }

    #[test]
    fn video_datetime_shapes() {
        assert!(parse_video_datetime("2023-06-15T10:30:00.000000Z").is_some());
        assert!(parse_video_datetime("2023-06-15T10:30:00+0900").is_some());
        assert!(parse_video_datetime("2023-06-15T10:30:00").is_some());
        assert!(parse_video_datetime("yesterday").is_none());
    }

    #[test]
    fn tag_lookup_is_case_insensitive() {
        let mut tags = HashMap::new();
        tags.insert("Creation_Time".to_string(), "2023-06-15T10:30:00Z".to_string());
        assert_eq!(tag(&tags, "creation_time"), Some("2023-06-15T10:30:00Z"));
        assert!(tag(&tags, "missing").is_none());
    }

    #[tokio::test]
    async fn missing_ffprobe_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"x").unwrap();

        let meta = extract_video_metadata(None, &path).await;
        assert!(meta.captured_at.is_some());
        assert!(meta.camera_make.is_none());
    }
}
