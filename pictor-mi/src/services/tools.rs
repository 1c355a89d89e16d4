//! External tool discovery
//!
//! The converter and thumbnailer shell out to whatever decoders are
//! installed. Every binary is optional; a missing tool downgrades the
//! feature instead of failing ingestion.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Resolved paths of the external binaries the pipeline can use.
#[derive(Debug, Clone, Default)]
pub struct Tools {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub magick: Option<PathBuf>,
    pub convert: Option<PathBuf>,
    pub heif_convert: Option<PathBuf>,
}

impl Tools {
    /// Probe once at startup. A `bin/` directory under the storage root is
    /// checked before `PATH` so a bundled ffmpeg wins over the system one.
    pub fn detect(local_bin: Option<&Path>) -> Self {
        let tools = Self {
            ffmpeg: locate("ffmpeg", local_bin),
            ffprobe: locate("ffprobe", local_bin),
            magick: locate("magick", local_bin),
            convert: locate("convert", local_bin),
            heif_convert: locate("heif-convert", local_bin),
        };

        info!(
            ffmpeg = tools.ffmpeg.is_some(),
            ffprobe = tools.ffprobe.is_some(),
            magick = tools.magick.is_some(),
            convert = tools.convert.is_some(),
            heif_convert = tools.heif_convert.is_some(),
            "external tool probe"
        );

        tools
    }

    /// No tools at all; tests use this to exercise the degraded paths.
    pub fn none() -> Self {
        Self::default()
    }
}

fn locate(name: &str, local_bin: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = local_bin {
        let candidate = dir.join(name);
        if candidate.is_file() {
            debug!(tool = name, path = %candidate.display(), "using bundled binary");
            return Some(candidate);
        }
    }

    let finder = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(finder).arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let path = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .to_string();
    if path.is_empty() {
        return None;
    }

    let path = PathBuf::from(path);
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_binary_wins_over_path() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("ffmpeg");
        std::fs::write(&bundled, b"#!/bin/sh\n").unwrap();

        let found = locate("ffmpeg", Some(dir.path()));
        assert_eq!(found, Some(bundled));
    }

    #[test]
    fn unknown_tool_resolves_to_none() {
        assert!(locate("definitely-not-a-real-binary-xyz", None).is_none());
    }
}
