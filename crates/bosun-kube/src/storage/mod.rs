//! Storage drivers for persisting release records
//!
//! Two backends ship with the engine:
//! - **File**: one compressed JSON file per revision under a base directory
//! - **Mock**: in-memory, with operation counts for assertions
//!
//! Cluster-side backends (Secrets, ConfigMaps) plug in through
//! [`StorageDriver`].

mod file;
mod mock;

pub use file::FileDriver;
pub use mock::{MockStorageDriver, OperationCounts};

use async_trait::async_trait;
use bosun_core::{Compression, Release, ReleaseStatus, Settings};
use tracing::debug;

use crate::error::{KubeError, Result};

/// Storage driver trait for release persistence
///
/// History is always returned in ascending version order.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific release by name and version
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Get the latest release for a name
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Release>;

    /// List releases, optionally filtered by namespace and/or name
    ///
    /// Without `include_superseded` only the latest revision of each name is
    /// returned.
    async fn list(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        include_superseded: bool,
    ) -> Result<Vec<Release>>;

    /// All revisions of a name, oldest first
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>>;

    /// Create a new release
    async fn create(&self, release: &Release) -> Result<()>;

    /// Update an existing release
    async fn update(&self, release: &Release) -> Result<()>;

    /// Delete a specific release version
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Delete all versions of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>>;

    /// Revisions up to and including `revision`, oldest first
    async fn history_until_revision(
        &self,
        namespace: &str,
        name: &str,
        revision: u32,
    ) -> Result<Vec<Release>> {
        let mut history = self.history(namespace, name).await?;
        history.retain(|r| r.version <= revision);
        Ok(history)
    }

    /// Every revision currently marked Deployed, oldest first
    async fn deployed_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let mut history = match self.history(namespace, name).await {
            Ok(history) => history,
            Err(KubeError::ReleaseNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        history.retain(|r| r.info.status == ReleaseStatus::Deployed);
        Ok(history)
    }

    /// Latest revision marked Deployed
    async fn deployed(&self, namespace: &str, name: &str) -> Result<Release> {
        self.deployed_all(namespace, name)
            .await?
            .pop()
            .ok_or_else(|| KubeError::NoDeployedReleases {
                name: name.to_string(),
            })
    }

    /// Check if a release exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.get_latest(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Compression method
    pub compression: CompressionMethod,

    /// Maximum number of revisions to keep per release (0 = unlimited)
    pub max_history: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Zstd { level: 3 },
            max_history: 10,
        }
    }
}

impl StorageConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            compression: settings.compression.into(),
            max_history: settings.max_history,
        }
    }
}

/// Compression method for release data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression
    Gzip { level: u32 },

    /// Zstd compression (better ratio, faster)
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl From<Compression> for CompressionMethod {
    fn from(c: Compression) -> Self {
        match c {
            Compression::None => Self::None,
            Compression::Gzip => Self::Gzip { level: 6 },
            Compression::Zstd => Self::Zstd { level: 3 },
        }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Serialize a release to JSON bytes
pub fn serialize_release(release: &Release) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(release)?)
}

/// Deserialize a release from JSON bytes
pub fn deserialize_release(data: &[u8]) -> Result<Release> {
    Ok(serde_json::from_slice(data)?)
}

/// Delete the oldest revisions beyond `max_history`
///
/// Revisions marked Deployed are never pruned. Returns the pruned versions.
pub async fn prune_history(
    storage: &dyn StorageDriver,
    namespace: &str,
    name: &str,
    max_history: u32,
) -> Result<Vec<u32>> {
    let history = storage.history(namespace, name).await?;
    let excess = history.len().saturating_sub(max_history as usize);
    if max_history == 0 || excess == 0 {
        return Ok(Vec::new());
    }

    let mut pruned = Vec::new();
    for release in history
        .iter()
        .filter(|r| r.info.status != ReleaseStatus::Deployed)
        .take(excess)
    {
        storage.delete(namespace, name, release.version).await?;
        pruned.push(release.version);
    }

    debug!(release = name, ?pruned, "pruned history");
    Ok(pruned)
}
