//! Cluster client abstraction
//!
//! The engine never talks to the API server directly. It drives a
//! [`ClusterClient`], implemented over `kube` by [`KubeClusterClient`] and in
//! memory by [`MockClusterClient`] for tests and offline runs.

mod kube_client;
mod mock;
mod readiness;

pub use kube_client::KubeClusterClient;
pub use mock::{ClusterCall, MockClusterClient};
pub use readiness::Readiness;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KubeError, Result};
use crate::resource::{ResourceInfo, ResourceList};

/// Outcome of a create/update/delete call
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    pub created: ResourceList,
    pub updated: ResourceList,
    pub deleted: ResourceList,
}

/// Failed create/update together with what was applied before the failure
#[derive(Debug)]
pub struct PartialApply {
    pub result: OperationResult,
    pub error: KubeError,
}

impl PartialApply {
    pub fn new(result: OperationResult, error: KubeError) -> Self {
        Self { result, error }
    }
}

impl From<PartialApply> for KubeError {
    fn from(p: PartialApply) -> Self {
        p.error
    }
}

/// Result of create/update: the full outcome or a partial one plus the error
pub type ApplyResult = std::result::Result<OperationResult, PartialApply>;

/// Options for [`ClusterClient::update`]
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Leave resources owned by another release in place when pruning
    pub skip_delete_if_invalid_ownership: bool,
    /// Overwrite target objects owned by another release instead of failing
    pub ignore_ownership_mismatch: bool,
    pub release_name: String,
    pub release_namespace: String,
}

/// Options for [`ClusterClient::delete`]
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Block until the resources are gone
    pub wait: bool,
    pub wait_timeout: Option<Duration>,
    /// Skip resources owned by another release instead of failing
    pub skip_if_invalid_ownership: bool,
    pub release_name: String,
    pub release_namespace: String,
    pub cascade: DeletionCascade,
}

impl DeleteOptions {
    pub fn for_release(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            release_name: name.into(),
            release_namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Cascade deletion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionCascade {
    /// Delete in background (default)
    #[default]
    Background,

    /// Delete in foreground (wait for dependents)
    Foreground,

    /// Orphan dependents (don't delete them)
    Orphan,
}

impl std::fmt::Display for DeletionCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Foreground => write!(f, "foreground"),
            Self::Orphan => write!(f, "orphan"),
        }
    }
}

/// Owner (`namespace/name`) of a live object when it is not the given release
pub(crate) fn foreign_owner(
    live: &ResourceInfo,
    release_name: &str,
    release_namespace: &str,
) -> Option<String> {
    live.owner_release()
        .filter(|(name, namespace)| *name != release_name || *namespace != release_namespace)
        .map(|(name, namespace)| format!("{}/{}", namespace, name))
}

/// Raw cluster operations consumed by the rollout engine
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fail fast if the API server cannot be reached
    async fn is_reachable(&self) -> Result<()>;

    /// Parse a manifest into resources, defaulting namespaces to `namespace`
    fn build(&self, manifest: &str, namespace: &str) -> Result<ResourceList>;

    /// Live copy of a resource, `None` when it does not exist
    async fn get(&self, info: &ResourceInfo) -> Result<Option<ResourceInfo>>;

    /// Create all resources
    async fn create(&self, resources: &ResourceList) -> ApplyResult;

    /// Converge `current` to `target`
    ///
    /// Resources only in `target` are created, those in both are updated
    /// (replaced when `force`), those only in `current` are deleted. A target
    /// object owned by another release fails with
    /// [`KubeError::OwnershipMismatch`] unless `ignore_ownership_mismatch`.
    async fn update(
        &self,
        current: &ResourceList,
        target: &ResourceList,
        force: bool,
        options: &UpdateOptions,
    ) -> ApplyResult;

    /// Delete resources, tolerating already deleted ones
    ///
    /// Errors are collected per resource rather than aborting.
    async fn delete(
        &self,
        resources: &ResourceList,
        options: &DeleteOptions,
    ) -> (OperationResult, Vec<KubeError>);

    /// Wait until resources are ready
    async fn wait(&self, resources: &ResourceList, timeout: Duration) -> Result<()>;

    /// Wait until resources are ready and Jobs have completed
    async fn wait_with_jobs(&self, resources: &ResourceList, timeout: Duration) -> Result<()>;

    /// Wait until resources no longer exist
    async fn wait_for_delete(&self, resources: &ResourceList, timeout: Duration) -> Result<()>;

    /// Restart the pods of updated workloads
    async fn recreate_pods(&self, resources: &ResourceList) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::cm;

    #[test]
    fn test_delete_options_for_release() {
        let opts = DeleteOptions::for_release("demo", "web");
        assert_eq!(opts.release_name, "demo");
        assert_eq!(opts.cascade, DeletionCascade::Background);
        assert!(!opts.wait);
    }

    #[test]
    fn test_foreign_owner() {
        let mut own = cm("a");
        own.set_release_metadata("demo", "default");
        assert_eq!(foreign_owner(&own, "demo", "default"), None);
        assert_eq!(
            foreign_owner(&own, "demo", "staging").as_deref(),
            Some("default/demo")
        );
        assert_eq!(foreign_owner(&cm("unowned"), "demo", "default"), None);
    }

    #[test]
    fn test_cascade_display() {
        assert_eq!(DeletionCascade::Foreground.to_string(), "foreground");
        let parsed: DeletionCascade = serde_json::from_str("\"orphan\"").unwrap();
        assert_eq!(parsed, DeletionCascade::Orphan);
    }
}
