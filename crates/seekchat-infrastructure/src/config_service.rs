//! Loads [`ClientConfig`] from `~/.config/seekchat/config.toml`.

use seekchat_core::config::ClientConfig;
use seekchat_core::error::{ChatError, Result};
use std::fs;
use std::path::PathBuf;

use crate::paths::SeekchatPaths;

/// Reads the client configuration file.
///
/// A missing or empty file yields the defaults; fields absent from the file
/// keep their default values.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: PathBuf,
}

impl ConfigService {
    /// Uses the platform config path.
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(SeekchatPaths::config_file()?))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn load(&self) -> Result<ClientConfig> {
        if !self.path.exists() {
            tracing::debug!("No config file at {}, using defaults", self.path.display());
            return Ok(ClientConfig::default());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(ClientConfig::default());
        }

        toml::from_str(&content).map_err(|e| {
            ChatError::config(format!("Invalid config file {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let service = ConfigService::with_path(temp_dir.path().join("config.toml"));
        assert_eq!(service.load().unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "base_url = \"http://localhost:8080/v1\"\nstall_keep_alive_threshold = 3\n",
        )
        .unwrap();

        let config = ConfigService::with_path(path).load().unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.stall_keep_alive_threshold, 3);
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "max_tokens = \"many\"").unwrap();

        let err = ConfigService::with_path(path).load().unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
