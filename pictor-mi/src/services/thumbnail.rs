//! Thumbnail derivation
//!
//! Images go through an in-process decoder first and fall back to ffmpeg;
//! the fallback has no notion of EXIF orientation so the rotation is
//! applied explicitly there. Video frames are always grabbed with ffmpeg,
//! retrying a fixed ladder of seek offsets to dodge corrupt frames.

use crate::services::tools::Tools;
use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Seek offsets (seconds) tried in order for video frame extraction.
const VIDEO_SEEK_OFFSETS: &[f64] = &[1.0, 0.5, 2.0, 3.0, 0.1];

/// Map a 0-100 quality percentage onto ffmpeg's inverted 2-31 quantizer.
pub fn map_quality_to_qscale(quality: u8) -> u8 {
    let quality = quality.min(100) as f64;
    let qscale = 31.0 - (quality / 100.0 * 29.0);
    qscale.round().clamp(2.0, 31.0) as u8
}

/// Format a seek offset as `HH:MM:SS.mmm` for ffmpeg.
fn format_seek(seconds: f64) -> String {
    let hours = (seconds / 3600.0).floor() as u64;
    let minutes = ((seconds % 3600.0) / 60.0).floor() as u64;
    let secs = seconds % 60.0;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}

/// ffmpeg filter chain applying a rotation then a width-preserving scale.
fn ffmpeg_filter(width: u32, rotation: u32) -> String {
    let scale = format!("scale={}:-1", width);
    match rotation {
        90 => format!("transpose=1,{}", scale),
        180 => format!("transpose=1,transpose=1,{}", scale),
        270 => format!("transpose=2,{}", scale),
        _ => scale,
    }
}

/// In-process engine: decode, rotate per the orientation-derived degrees,
/// resize preserving aspect ratio, encode JPEG.
fn image_crate_thumbnail(
    src: &Path,
    dst: &Path,
    width: u32,
    quality: u8,
    rotation: u32,
) -> Result<()> {
    let img = image::open(src).with_context(|| format!("decode {}", src.display()))?;

    let img = match rotation {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    };

    let (w, h) = (img.width(), img.height());
    let target_w = width.min(w.max(1));
    let target_h = ((target_w as u64 * h as u64) / w.max(1) as u64).max(1) as u32;
    let resized = img.resize_exact(target_w, target_h, FilterType::Lanczos3);

    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut out = std::fs::File::create(dst)?;
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(&resized.to_rgb8())
        .with_context(|| format!("encode {}", dst.display()))?;

    Ok(())
}

/// Fallback engine: ffmpeg with an explicit transpose chain.
async fn ffmpeg_image_thumbnail(
    ffmpeg: &Path,
    src: &Path,
    dst: &Path,
    width: u32,
    quality: u8,
    rotation: u32,
) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = Command::new(ffmpeg)
        .arg("-threads")
        .arg("1")
        .arg("-i")
        .arg(src)
        .arg("-vframes")
        .arg("1")
        .arg("-vf")
        .arg(ffmpeg_filter(width, rotation))
        .arg("-q:v")
        .arg(map_quality_to_qscale(quality).to_string())
        .arg("-y")
        .arg(dst)
        .output()
        .await
        .context("failed to spawn ffmpeg")?;

    if !output.status.success() {
        bail!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    if std::fs::metadata(dst).map(|m| m.len()).unwrap_or(0) == 0 {
        bail!("ffmpeg produced an empty thumbnail");
    }

    Ok(())
}

/// Derive an image thumbnail, trying the in-process engine then ffmpeg.
/// Thumbnail failure is non-fatal to ingestion, so this returns a bool.
pub async fn make_image_thumbnail(
    tools: &Tools,
    src: &Path,
    dst: &Path,
    width: u32,
    quality: u8,
    rotation: u32,
) -> bool {
    match image_crate_thumbnail(src, dst, width, quality, rotation) {
        Ok(()) => {
            debug!(src = %src.display(), "image thumbnail generated in-process");
            return true;
        }
        Err(e) => {
            warn!(src = %src.display(), error = %e, "in-process thumbnail failed");
            let _ = std::fs::remove_file(dst);
        }
    }

    let Some(ffmpeg) = tools.ffmpeg.as_ref() else {
        warn!(src = %src.display(), "no thumbnail engine available (ffmpeg not installed)");
        return false;
    };

    match ffmpeg_image_thumbnail(ffmpeg, src, dst, width, quality, rotation).await {
        Ok(()) => {
            debug!(src = %src.display(), "image thumbnail generated by ffmpeg");
            true
        }
        Err(e) => {
            warn!(src = %src.display(), error = %e, "ffmpeg thumbnail failed");
            let _ = std::fs::remove_file(dst);
            false
        }
    }
}

/// Grab one representative video frame, walking the seek-offset ladder
/// until a non-empty frame comes out.
pub async fn make_video_thumbnail(
    tools: &Tools,
    src: &Path,
    dst: &Path,
    width: u32,
    quality: u8,
) -> bool {
    let Some(ffmpeg) = tools.ffmpeg.as_ref() else {
        warn!(src = %src.display(), "video thumbnail skipped (ffmpeg not installed)");
        return false;
    };

    if let Some(parent) = dst.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }

    for &offset in VIDEO_SEEK_OFFSETS {
        // Error-tolerant, keyframe-only, single-threaded decode keeps
        // memory bounded and skips over corrupt regions
        let result = Command::new(ffmpeg)
            .arg("-err_detect")
            .arg("ignore_err")
            .arg("-skip_frame")
            .arg("nokey")
            .arg("-threads")
            .arg("1")
            .arg("-ss")
            .arg(format_seek(offset))
            .arg("-i")
            .arg(src)
            .arg("-vframes")
            .arg("1")
            .arg("-vf")
            .arg(format!("scale={}:-1", width))
            .arg("-q:v")
            .arg(map_quality_to_qscale(quality).to_string())
            .arg("-y")
            .arg(dst)
            .output()
            .await;

        match result {
            Ok(output) => {
                let produced = output.status.success()
                    && std::fs::metadata(dst).map(|m| m.len()).unwrap_or(0) > 0;
                if produced {
                    info!(src = %src.display(), offset, "video thumbnail extracted");
                    return true;
                }
                debug!(src = %src.display(), offset, "no frame at offset, trying next");
                let _ = std::fs::remove_file(dst);
            }
            Err(e) => {
                warn!(src = %src.display(), error = %e, "failed to spawn ffmpeg");
                return false;
            }
        }
    }

    warn!(src = %src.display(), "video thumbnail failed at every seek offset");
    false
}

/// Emit a lossy WebP sibling re-encoded from the finished JPEG thumbnail,
/// which guarantees identical dimensions.
pub fn make_webp_sibling(jpeg_thumb: &Path, dst: &Path, quality: u8) -> bool {
    let result: Result<()> = (|| {
        let img = image::open(jpeg_thumb)?;
        let rgba = img.to_rgba8();
        let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
        let data = encoder.encode(quality as f32);
        std::fs::write(dst, &*data)?;
        Ok(())
    })();

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(src = %jpeg_thumb.display(), error = %e, "WebP thumbnail failed");
            let _ = std::fs::remove_file(dst);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_test_png(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, _| {
            Rgb([(x % 256) as u8, 80u8, 120u8])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn quality_maps_onto_inverted_quantizer() {
        assert_eq!(map_quality_to_qscale(85), 6);
        assert_eq!(map_quality_to_qscale(100), 2);
        assert_eq!(map_quality_to_qscale(0), 31);
        assert!(map_quality_to_qscale(50) > map_quality_to_qscale(90));
    }

    #[test]
    fn seek_offsets_format_as_timestamps() {
        assert_eq!(format_seek(1.0), "00:00:01.000");
        assert_eq!(format_seek(0.5), "00:00:00.500");
        assert_eq!(format_seek(3661.25), "01:01:01.250");
    }

    #[test]
    fn rotation_produces_transpose_filters() {
        assert_eq!(ffmpeg_filter(400, 0), "scale=400:-1");
        assert_eq!(ffmpeg_filter(400, 90), "transpose=1,scale=400:-1");
        assert_eq!(ffmpeg_filter(400, 180), "transpose=1,transpose=1,scale=400:-1");
        assert_eq!(ffmpeg_filter(400, 270), "transpose=2,scale=400:-1");
    }

    #[tokio::test]
    async fn image_thumbnail_resizes_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("wide.png");
        let dst = dir.path().join("thumb.jpg");
        write_test_png(&src, 800, 200);

        // 90 degree rotation swaps the aspect before the resize
        assert!(make_image_thumbnail(&Tools::none(), &src, &dst, 100, 85, 90).await);

        let thumb = image::open(&dst).unwrap();
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 400);
    }

    #[tokio::test]
    async fn small_images_are_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("small.png");
        let dst = dir.path().join("thumb.jpg");
        write_test_png(&src, 50, 30);

        assert!(make_image_thumbnail(&Tools::none(), &src, &dst, 400, 85, 0).await);
        let thumb = image::open(&dst).unwrap();
        assert_eq!(thumb.width(), 50);
    }

    #[tokio::test]
    async fn undecodable_input_without_ffmpeg_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.jpg");
        let dst = dir.path().join("thumb.jpg");
        std::fs::write(&src, b"not an image").unwrap();

        assert!(!make_image_thumbnail(&Tools::none(), &src, &dst, 400, 85, 0).await);
        assert!(!dst.exists());
    }

    /// Stand-in decoder that errors at the primary seek offset and only
    /// produces a frame at the 0.5s fallback.
    #[cfg(unix)]
    fn write_flaky_decoder(dir: &Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             prev=\"\"; ss=\"\"; out=\"\"\n\
             for a in \"$@\"; do\n\
               if [ \"$prev\" = \"-ss\" ]; then ss=\"$a\"; fi\n\
               prev=\"$a\"; out=\"$a\"\n\
             done\n\
             if [ \"$ss\" != \"00:00:00.500\" ]; then exit 1; fi\n\
             printf frame > \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn video_thumbnail_recovers_at_a_fallback_offset() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        let dst = dir.path().join("thumb.jpg");
        std::fs::write(&src, b"x").unwrap();

        let tools = Tools {
            ffmpeg: Some(write_flaky_decoder(dir.path())),
            ..Tools::none()
        };

        assert!(make_video_thumbnail(&tools, &src, &dst, 400, 85).await);
        assert_eq!(std::fs::read(&dst).unwrap(), b"frame");
    }

    #[tokio::test]
    async fn video_thumbnail_without_ffmpeg_is_nonfatal() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        let dst = dir.path().join("thumb.jpg");
        std::fs::write(&src, b"x").unwrap();

        assert!(!make_video_thumbnail(&Tools::none(), &src, &dst, 400, 85).await);
    }

    #[test]
    fn webp_sibling_matches_jpeg_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = dir.path().join("thumb.jpg");
        let webp_path = dir.path().join("thumb.webp");

        let img = ImageBuffer::from_pixel(120, 90, Rgb([10u8, 20, 30]));
        img.save(&jpeg).unwrap();

        assert!(make_webp_sibling(&jpeg, &webp_path, 85));
        let out = image::open(&webp_path).unwrap();
        assert_eq!((out.width(), out.height()), (120, 90));
    }
}
