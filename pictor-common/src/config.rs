//! Configuration loading and storage root resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Storage root resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `PICTOR_ROOT` environment variable
/// 3. TOML config file (`pictor/config.toml` under the user config dir)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_storage_root(cli_arg: Option<&str>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var("PICTOR_ROOT") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root) = config.get("storage_root").and_then(|v| v.as_str()) {
                    return PathBuf::from(root);
                }
            }
        }
    }

    default_storage_root()
}

/// Get configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("pictor").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/pictor/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default storage root
fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pictor"))
        .unwrap_or_else(|| PathBuf::from("./pictor_data"))
}

/// Layout of the storage root used by the ingest service.
///
/// All paths recorded in the catalog are relative to this root so the
/// whole tree can be relocated without rewriting rows.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("pictor.db")
    }

    /// Per-identifier chunk scratch directories live under here.
    pub fn chunk_dir(&self) -> PathBuf {
        self.root.join("scratch").join("chunks")
    }

    /// Per-identifier archive extraction directories live under here.
    pub fn extract_dir(&self) -> PathBuf {
        self.root.join("scratch").join("extract")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("media").join("images")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("media").join("videos")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("media").join("thumbnails")
    }

    /// Create every directory the service writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.chunk_dir(),
            self.extract_dir(),
            self.images_dir(),
            self.videos_dir(),
            self.thumbnails_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Path of a stored file relative to the root, for catalog rows.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_wins() {
        let root = resolve_storage_root(Some("/tmp/pictor-test"));
        assert_eq!(root, PathBuf::from("/tmp/pictor-test"));
    }

    #[test]
    fn layout_paths_are_under_root() {
        let layout = StorageLayout::new(PathBuf::from("/data/pictor"));
        assert!(layout.chunk_dir().starts_with("/data/pictor"));
        assert!(layout.thumbnails_dir().starts_with("/data/pictor"));
        assert_eq!(layout.database_path(), PathBuf::from("/data/pictor/pictor.db"));
    }

    #[test]
    fn relative_path_strips_root() {
        let layout = StorageLayout::new(PathBuf::from("/data/pictor"));
        let stored = PathBuf::from("/data/pictor/media/images/a.jpg");
        assert_eq!(layout.relative_path(&stored), "media/images/a.jpg");
    }
}
