//! HEIC to JPEG conversion
//!
//! An ordered chain of conversion engines, each probed for availability
//! and tried until one produces a non-empty JPEG. No engine available is
//! a legitimate outcome: the caller keeps the HEIC original and the
//! client renders it directly.

use crate::services::thumbnail::map_quality_to_qscale;
use crate::services::tools::Tools;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One conversion engine in the fallback chain.
#[async_trait]
pub trait HeicEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn available(&self) -> bool;
    async fn convert(&self, src: &Path, dst: &Path, quality: u8) -> Result<()>;
}

async fn run_engine(name: &str, command: &mut Command, dst: &Path) -> Result<()> {
    let output = command
        .output()
        .await
        .with_context(|| format!("failed to spawn {}", name))?;

    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            name,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let size = std::fs::metadata(dst).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        bail!("{} produced no output", name);
    }

    Ok(())
}

/// ffmpeg decodes HEIF via libheif and is the most commonly installed
/// option, so it goes first.
struct FfmpegHeic {
    path: Option<PathBuf>,
}

#[async_trait]
impl HeicEngine for FfmpegHeic {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn available(&self) -> bool {
        self.path.is_some()
    }

    async fn convert(&self, src: &Path, dst: &Path, quality: u8) -> Result<()> {
        let path = self.path.as_ref().context("ffmpeg not available")?;
        // -map 0:v:0 picks the primary still; multi-image HEIC containers
        // otherwise error out
        let mut cmd = Command::new(path);
        cmd.arg("-threads")
            .arg("1")
            .arg("-i")
            .arg(src)
            .arg("-map")
            .arg("0:v:0")
            .arg("-q:v")
            .arg(map_quality_to_qscale(quality).to_string())
            .arg("-y")
            .arg(dst);
        run_engine(self.name(), &mut cmd, dst).await
    }
}

/// ImageMagick 7 (`magick`) or 6 (`convert`).
struct MagickHeic {
    path: Option<PathBuf>,
    name: &'static str,
}

#[async_trait]
impl HeicEngine for MagickHeic {
    fn name(&self) -> &'static str {
        self.name
    }

    fn available(&self) -> bool {
        self.path.is_some()
    }

    async fn convert(&self, src: &Path, dst: &Path, quality: u8) -> Result<()> {
        let path = self.path.as_ref().context("imagemagick not available")?;
        let mut cmd = Command::new(path);
        cmd.arg(src)
            .arg("-quality")
            .arg(quality.to_string())
            .arg(dst);
        run_engine(self.name(), &mut cmd, dst).await
    }
}

/// libheif's own `heif-convert` utility.
struct HeifConvert {
    path: Option<PathBuf>,
}

#[async_trait]
impl HeicEngine for HeifConvert {
    fn name(&self) -> &'static str {
        "heif-convert"
    }

    fn available(&self) -> bool {
        self.path.is_some()
    }

    async fn convert(&self, src: &Path, dst: &Path, quality: u8) -> Result<()> {
        let path = self.path.as_ref().context("heif-convert not available")?;
        let mut cmd = Command::new(path);
        cmd.arg("-q").arg(quality.to_string()).arg(src).arg(dst);
        run_engine(self.name(), &mut cmd, dst).await
    }
}

/// The ordered fallback chain.
pub struct HeicConverter {
    engines: Vec<Box<dyn HeicEngine>>,
}

impl HeicConverter {
    pub fn new(tools: &Tools) -> Self {
        Self {
            engines: vec![
                Box::new(FfmpegHeic {
                    path: tools.ffmpeg.clone(),
                }),
                Box::new(MagickHeic {
                    path: tools.magick.clone(),
                    name: "magick",
                }),
                Box::new(MagickHeic {
                    path: tools.convert.clone(),
                    name: "convert",
                }),
                Box::new(HeifConvert {
                    path: tools.heif_convert.clone(),
                }),
            ],
        }
    }

    /// Whether at least one engine could run.
    pub fn available(&self) -> bool {
        self.engines.iter().any(|e| e.available())
    }

    /// Try each available engine in order. Returns `true` when `dst` holds
    /// a usable JPEG; `false` means the caller should keep the original.
    pub async fn convert_heic_to_jpeg(&self, src: &Path, dst: &Path, quality: u8) -> bool {
        for engine in &self.engines {
            if !engine.available() {
                debug!(engine = engine.name(), "conversion engine not installed");
                continue;
            }

            match engine.convert(src, dst, quality).await {
                Ok(()) => {
                    info!(
                        engine = engine.name(),
                        src = %src.display(),
                        "HEIC converted to JPEG"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(engine = engine.name(), error = %e, "HEIC conversion attempt failed");
                    let _ = std::fs::remove_file(dst);
                }
            }
        }

        warn!(src = %src.display(), "no HEIC conversion engine succeeded; keeping original");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_toolset_converts_nothing() {
        let converter = HeicConverter::new(&Tools::none());
        assert!(!converter.available());

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.heic");
        let dst = dir.path().join("a.jpg");
        std::fs::write(&src, b"x").unwrap();

        assert!(!converter.convert_heic_to_jpeg(&src, &dst, 90).await);
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn failing_engine_falls_through_to_next() {
        struct Failing;
        struct Succeeding;

        #[async_trait]
        impl HeicEngine for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn available(&self) -> bool {
                true
            }
            async fn convert(&self, _src: &Path, _dst: &Path, _q: u8) -> Result<()> {
                bail!("decoder exploded")
            }
        }

        #[async_trait]
        impl HeicEngine for Succeeding {
            fn name(&self) -> &'static str {
                "succeeding"
            }
            fn available(&self) -> bool {
                true
            }
            async fn convert(&self, _src: &Path, dst: &Path, _q: u8) -> Result<()> {
                std::fs::write(dst, b"jpeg bytes")?;
                Ok(())
            }
        }

        let converter = HeicConverter {
            engines: vec![Box::new(Failing), Box::new(Succeeding)],
        };

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.heic");
        let dst = dir.path().join("a.jpg");
        std::fs::write(&src, b"x").unwrap();

        assert!(converter.convert_heic_to_jpeg(&src, &dst, 90).await);
        assert_eq!(std::fs::read(&dst).unwrap(), b"jpeg bytes");
    }
}
