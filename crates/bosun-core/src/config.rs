//! Engine settings
//!
//! Stored in `~/.config/bosun/config.yaml`. Every field has a default so a
//! missing file or a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Directory of the local release store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Compression of stored release records
    #[serde(default)]
    pub compression: Compression,

    /// Revisions kept per release (0 = unlimited)
    #[serde(default = "default_max_history")]
    pub max_history: u32,

    /// Timeout for waits and hooks
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Wait for each stage to become ready before the next one
    #[serde(default)]
    pub wait: bool,

    /// Also wait for Jobs of a stage to complete
    #[serde(default)]
    pub wait_for_jobs: bool,

    /// How manifests are split into stages
    #[serde(default)]
    pub splitter: SplitterKind,
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("bosun").join("releases"))
        .unwrap_or_else(|| PathBuf::from(".bosun/releases"))
}

fn default_max_history() -> u32 {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            compression: Compression::default(),
            max_history: default_max_history(),
            timeout: default_timeout(),
            wait: false,
            wait_for_jobs: false,
            splitter: SplitterKind::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("bosun").join("config.yaml"))
    }

    /// `max_history` as an optional limit
    pub fn history_limit(&self) -> Option<u32> {
        (self.max_history > 0).then_some(self.max_history)
    }
}

/// Compression of persisted release records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    #[default]
    Zstd,
}

/// Stage splitting policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitterKind {
    /// Everything in one stage
    #[default]
    Single,
    /// One stage per weight annotation value
    Weight,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let yaml = "maxHistory: 3\ntimeout: 90s\nsplitter: weight\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(settings.max_history, 3);
        assert_eq!(settings.timeout, Duration::from_secs(90));
        assert_eq!(settings.splitter, SplitterKind::Weight);
        assert_eq!(settings.compression, Compression::Zstd);
        assert!(!settings.wait);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bosun").join("config.yaml");

        let settings = Settings {
            storage_dir: tmp.path().join("releases"),
            compression: Compression::Gzip,
            wait: true,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_history_limit() {
        let mut settings = Settings::default();
        assert_eq!(settings.history_limit(), Some(10));
        settings.max_history = 0;
        assert_eq!(settings.history_limit(), None);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "compression: brotli\n").unwrap();

        assert!(matches!(
            Settings::load_from(&path),
            Err(CoreError::YamlParse(_))
        ));
    }
}
