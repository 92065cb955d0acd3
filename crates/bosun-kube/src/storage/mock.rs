//! Mock storage driver for testing
//!
//! This driver stores releases in memory, useful for unit tests
//! without requiring a Kubernetes cluster.

use async_trait::async_trait;
use bosun_core::Release;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::StorageDriver;
use crate::error::{KubeError, Result};

/// namespace -> name -> version -> release
type Store = HashMap<String, HashMap<String, BTreeMap<u32, Release>>>;

/// In-memory storage driver for testing
#[derive(Clone, Default)]
pub struct MockStorageDriver {
    store: Arc<RwLock<Store>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

impl MockStorageDriver {
    /// Create a new empty mock driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<Release>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.write();
            for release in releases {
                store
                    .entry(release.namespace.clone())
                    .or_default()
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.version, release);
            }
        }
        driver
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.write().unwrap_or_else(|e| e.into_inner()));
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        self.count(|ops| *ops = OperationCounts::default());
    }

    /// Get all releases (for testing)
    pub fn all_releases(&self) -> Vec<Release> {
        self.read()
            .values()
            .flat_map(|ns| ns.values())
            .flat_map(|name| name.values())
            .cloned()
            .collect()
    }

    /// Count total releases
    pub fn release_count(&self) -> usize {
        self.read()
            .values()
            .flat_map(|ns| ns.values())
            .map(|name| name.len())
            .sum()
    }
}

#[async_trait]
impl StorageDriver for MockStorageDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.count(|ops| ops.gets += 1);

        self.read()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Release> {
        self.count(|ops| ops.gets += 1);

        self.read()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        include_superseded: bool,
    ) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);

        let store = self.read();
        let mut releases: Vec<Release> = store
            .iter()
            .filter(|(ns, _)| namespace.is_none_or(|n| n == *ns))
            .flat_map(|(_, names)| names.iter())
            .filter(|(n, _)| name.is_none_or(|filter| filter == *n))
            .flat_map(|(_, versions)| {
                let take = if include_superseded { versions.len() } else { 1 };
                versions.values().rev().take(take)
            })
            .cloned()
            .collect();

        releases.sort_by(|a, b| {
            (&a.namespace, &a.name, a.version).cmp(&(&b.namespace, &b.name, b.version))
        });
        Ok(releases)
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);

        let releases: Vec<Release> = self
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.creates += 1);

        let mut store = self.write();
        let versions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if versions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }

        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.updates += 1);

        self.write()
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default()
            .insert(release.version, release.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.count(|ops| ops.deletes += 1);

        self.write()
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(name))
            .and_then(|versions| versions.remove(&version))
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.count(|ops| ops.deletes += 1);

        let releases: Vec<Release> = self
            .write()
            .get_mut(namespace)
            .and_then(|ns| ns.remove(name))
            .map(|versions| versions.into_values().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_release(name: &str, namespace: &str, version: u32) -> Release {
        let mut release = Release::for_install(name, namespace, "kind: ConfigMap".to_string());
        release.version = version;
        release
    }

    #[tokio::test]
    async fn test_mock_create_and_get() {
        let driver = MockStorageDriver::new();

        let release = create_test_release("myapp", "default", 1);
        driver.create(&release).await.unwrap();

        let retrieved = driver.get("default", "myapp", 1).await.unwrap();
        assert_eq!(retrieved.name, "myapp");
        assert_eq!(retrieved.version, 1);

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_mock_create_duplicate_fails() {
        let driver = MockStorageDriver::new();

        let release = create_test_release("myapp", "default", 1);
        driver.create(&release).await.unwrap();

        let result = driver.create(&release).await;
        assert!(matches!(result, Err(KubeError::ReleaseAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_mock_get_latest_and_history_order() {
        let driver = MockStorageDriver::new();
        for v in [2, 3, 1] {
            driver
                .create(&create_test_release("myapp", "default", v))
                .await
                .unwrap();
        }

        let latest = driver.get_latest("default", "myapp").await.unwrap();
        assert_eq!(latest.version, 3);

        let versions: Vec<u32> = driver
            .history("default", "myapp")
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_mock_list_filters() {
        let driver = MockStorageDriver::with_releases(vec![
            create_test_release("app1", "default", 1),
            create_test_release("app1", "default", 2),
            create_test_release("app2", "default", 1),
            create_test_release("app1", "staging", 1),
        ]);

        assert_eq!(driver.list(None, None, false).await.unwrap().len(), 3);
        assert_eq!(driver.list(None, None, true).await.unwrap().len(), 4);

        let in_default = driver.list(Some("default"), None, false).await.unwrap();
        assert_eq!(in_default.len(), 2);
        assert_eq!(in_default[0].version, 2);

        let app1 = driver.list(None, Some("app1"), false).await.unwrap();
        assert_eq!(app1.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_delete_and_delete_all() {
        let driver = MockStorageDriver::with_releases(vec![
            create_test_release("myapp", "default", 1),
            create_test_release("myapp", "default", 2),
            create_test_release("myapp", "default", 3),
        ]);

        let deleted = driver.delete("default", "myapp", 1).await.unwrap();
        assert_eq!(deleted.version, 1);
        assert!(matches!(
            driver.get("default", "myapp", 1).await,
            Err(KubeError::ReleaseNotFound { .. })
        ));

        let rest = driver.delete_all("default", "myapp").await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(matches!(
            driver.history("default", "myapp").await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_operation_counts() {
        let driver = MockStorageDriver::new();

        driver
            .create(&create_test_release("myapp", "default", 1))
            .await
            .unwrap();
        let _ = driver.get("default", "myapp", 1).await;
        let _ = driver.list(None, None, false).await;
        driver
            .update(&create_test_release("myapp", "default", 1))
            .await
            .unwrap();
        let _ = driver.delete("default", "myapp", 1).await;

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
        assert_eq!(counts.lists, 1);
        assert_eq!(counts.updates, 1);
        assert_eq!(counts.deletes, 1);

        driver.reset_counts();
        assert_eq!(driver.operation_counts().creates, 0);
    }
}
