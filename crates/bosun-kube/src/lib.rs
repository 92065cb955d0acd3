//! Bosun Kube - Staged rollouts of releases onto Kubernetes
//!
//! This crate provides:
//! - **Resources**: Typed resource identities and set operations over them
//! - **Stages**: Splitting a release into ordered stages with external dependencies
//! - **Rollout**: Applying stages one by one with a persisted checkpoint
//! - **Storage Drivers**: Persist release history locally or in memory
//! - **Hooks**: Pre/post hooks around every operation
//! - **Actions**: Install, upgrade, rollback and uninstall on top of the above

pub mod actions;
pub mod annotations;
pub mod cluster;
pub mod error;
pub mod externaldeps;
pub mod hooks;
pub mod mapping;
pub mod ordering;
pub mod phases;
pub mod resource;
pub mod stages;
pub mod storage;

pub use actions::{
    ActionOutcome, Configuration, DeployStageHandler, InstallOptions, ReleaseContent,
    RollbackOptions, UninstallOptions, UninstallOutcome, UpgradeOptions,
};
pub use annotations::DependencyRef;
pub use cluster::{
    ApplyResult, ClusterCall, ClusterClient, DeleteOptions, DeletionCascade, KubeClusterClient,
    MockClusterClient, OperationResult, PartialApply, Readiness, UpdateOptions,
};
pub use error::{KubeError, Result};
pub use externaldeps::{ExternalDependency, ExternalDependencyList};
pub use hooks::{
    ClusterHookRunner, HookExecutor, HookResult, HookRunner, MockHookRunner, NoopHookRunner,
};
pub use mapping::{DiscoveryTypeMapper, StaticTypeMapper, TypeMapper, TypeMapping};
pub use ordering::{ResourceCategory, sort_for_apply, sort_for_delete};
pub use phases::{
    AnnotationExternalDepsGenerator, DeployedResourcesCalculator, ExternalDepsGenerator,
    NoExternalDepsGenerator, RolloutPhase, RolloutPhaseManager, SingleStageSplitter, Splitter,
    StageHandler, WeightAnnotationSplitter, splitter_for,
};
pub use resource::{ResourceInfo, ResourceList, parse_manifest};
pub use stages::{SortedStageList, Stage};
pub use storage::{
    CompressionMethod, FileDriver, MockStorageDriver, OperationCounts, StorageConfig,
    StorageDriver,
};
