//! Platform paths for SeekChat configuration and data.
//!
//! ```text
//! ~/.config/seekchat/          # Config directory
//! └── config.toml              # ClientConfig
//!
//! ~/.local/share/seekchat/     # Data directory (storage root)
//! ├── preferences.json
//! └── DeepSeek{fileKey}/
//! ```

use std::path::PathBuf;

const APP_DIR: &str = "seekchat";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for seekchat_core::ChatError {
    fn from(e: PathError) -> Self {
        seekchat_core::ChatError::config(e.to_string())
    }
}

pub struct SeekchatPaths;

impl SeekchatPaths {
    /// Returns the configuration directory (e.g., `~/.config/seekchat/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the storage root (e.g., `~/.local/share/seekchat/`).
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}
