//! File-based storage driver
//!
//! Stores each revision as `<base>/<namespace>/<name>/v<version>.json`,
//! compressed per [`StorageConfig`]. Useful for development, offline runs
//! and backup/restore.

use async_trait::async_trait;
use bosun_core::{Release, Settings};
use std::path::{Path, PathBuf};

use super::{
    StorageConfig, StorageDriver, compress, decompress, deserialize_release, serialize_release,
};
use crate::error::{KubeError, Result};

/// File-based storage driver
pub struct FileDriver {
    /// Base directory for storing releases
    base_dir: PathBuf,
    config: StorageConfig,
}

impl FileDriver {
    /// Create a new file driver
    pub fn new(base_dir: PathBuf, config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, config })
    }

    /// Driver rooted at the configured storage directory
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.storage_dir.clone(),
            StorageConfig::from_settings(settings),
        )
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn release_path(&self, namespace: &str, name: &str, version: u32) -> PathBuf {
        self.release_dir(namespace, name)
            .join(format!("v{}.json", version))
    }

    fn release_dir(&self, namespace: &str, name: &str) -> PathBuf {
        self.base_dir.join(namespace).join(name)
    }

    fn write_release(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serialize_release(release)?;
        let data = compress(&json, self.config.compression)?;
        std::fs::write(&path, data)?;
        Ok(())
    }

    fn read_release(&self, path: &Path) -> Result<Release> {
        let data = std::fs::read(path)?;
        let decompressed = decompress(&data, self.config.compression)?;
        deserialize_release(&decompressed)
    }

    /// Releases stored under a name directory, oldest first
    fn read_dir_releases(&self, dir: &Path) -> Result<Vec<Release>> {
        let mut releases: Vec<Release> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .map(|p| self.read_release(&p))
            .collect::<Result<_>>()?;
        releases.sort_by_key(|r| r.version);
        Ok(releases)
    }

    fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        Ok(std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect())
    }

    fn remove_if_empty(dir: &Path) -> Result<()> {
        if dir.exists() && std::fs::read_dir(dir)?.next().is_none() {
            std::fs::remove_dir(dir)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for FileDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let path = self.release_path(namespace, name, version);

        if !path.exists() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        self.read_release(&path)
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Release> {
        self.history(namespace, name)
            .await?
            .pop()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        include_superseded: bool,
    ) -> Result<Vec<Release>> {
        let namespaces = match namespace {
            Some(ns) => vec![self.base_dir.join(ns)],
            None => Self::subdirs(&self.base_dir)?,
        };

        let mut releases = Vec::new();
        for ns_path in namespaces {
            let names = match name {
                Some(n) => vec![ns_path.join(n)],
                None => Self::subdirs(&ns_path)?,
            };

            for name_path in names.into_iter().filter(|p| p.is_dir()) {
                let mut history = self.read_dir_releases(&name_path)?;
                if include_superseded {
                    releases.append(&mut history);
                } else if let Some(latest) = history.pop() {
                    releases.push(latest);
                }
            }
        }

        releases.sort_by(|a, b| {
            (&a.namespace, &a.name, a.version).cmp(&(&b.namespace, &b.name, b.version))
        });
        Ok(releases)
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let dir = self.release_dir(namespace, name);
        let releases = if dir.exists() {
            self.read_dir_releases(&dir)?
        } else {
            Vec::new()
        };

        if releases.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);

        if path.exists() {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }

        self.write_release(release)
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.write_release(release)
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.get(namespace, name, version).await?;
        std::fs::remove_file(self.release_path(namespace, name, version))?;

        Self::remove_if_empty(&self.release_dir(namespace, name))?;
        Self::remove_if_empty(&self.base_dir.join(namespace))?;

        Ok(release)
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let releases = self.history(namespace, name).await?;
        std::fs::remove_dir_all(self.release_dir(namespace, name))?;
        Self::remove_if_empty(&self.base_dir.join(namespace))?;
        Ok(releases)
    }
}
