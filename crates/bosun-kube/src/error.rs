//! Error types for bosun-kube

use thiserror::Error;

/// Result type for bosun-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while orchestrating a release
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Invalid release record or name
    #[error(transparent)]
    Core(#[from] bosun_core::CoreError),

    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Release already exists
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// Name is taken by a release that cannot be replaced
    #[error("cannot re-use a name that is still in use: '{name}'")]
    NameInUse { name: String },

    /// No revision of the release is deployed
    #[error("release '{name}' has no deployed releases")]
    NoDeployedReleases { name: String },

    /// Requested revision is not part of the history
    #[error("release '{name}' has no {revision} version")]
    RevisionNotFound { name: String, revision: u32 },

    /// Another operation is in progress
    #[error("another operation (install/upgrade/rollback) is in progress for release '{name}': {status}")]
    OperationInProgress { name: String, status: String },

    /// Cluster cannot be reached
    #[error("Kubernetes cluster unreachable: {0}")]
    Unreachable(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Resource type string or GVK cannot be resolved
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// Annotation has a value that cannot be interpreted
    #[error("invalid value {value:?} of annotation '{annotation}' on {resource}")]
    InvalidAnnotation {
        resource: String,
        annotation: String,
        value: String,
    },

    /// Splitting resources into stages failed
    #[error("error splitting rollout phase resources into stages: {0}")]
    StageSplit(#[source] Box<KubeError>),

    /// External dependency points at a resource of the same release
    #[error("resource {resource} can't have external dependency {dependency} on itself or other resource of the same release")]
    SelfDependency { resource: String, dependency: String },

    /// External dependency resolved twice
    #[error("info for external dependency '{0}' is already generated")]
    DependencyAlreadyResolved(String),

    /// Waiting on external dependencies of a stage failed
    #[error("error tracking external dependencies: {source}")]
    ExternalDependencies {
        stage: usize,
        #[source]
        source: Box<KubeError>,
    },

    /// Applying a stage failed
    #[error("error applying resources: {source}")]
    StageApply {
        stage: usize,
        #[source]
        source: Box<KubeError>,
    },

    /// Readiness tracking of a stage failed
    #[error("error tracking resources: {source}")]
    StageTrack {
        stage: usize,
        #[source]
        source: Box<KubeError>,
    },

    /// Stage handler returned without recording an outcome
    #[error("stage {stage} was applied without recording its result")]
    StageNotApplied { stage: usize },

    /// Release history contains a status the calculator cannot interpret
    #[error("unexpected status {status:?} of release version {version}")]
    UnexpectedStatus { version: u32, status: String },

    /// Deleting orphaned resources failed
    #[error("while deleting previously deployed but now orphaned resources got {count} error(s): {message}")]
    OrphanCleanup { count: usize, message: String },

    /// Removing resources created by a failed stage failed as well
    #[error("an error occurred while cleaning up resources. original {operation} error: {original}: unable to cleanup resources: {message}")]
    CleanupFailed {
        operation: String,
        original: String,
        message: String,
    },

    /// Release is already uninstalled and its history is kept
    #[error("the release named {0:?} is already deleted")]
    AlreadyDeleted(String),

    /// Uninstall finished but some steps failed
    #[error("uninstallation completed with {count} error(s): {message}")]
    UninstallIncomplete { count: usize, message: String },

    /// Resource operation failed
    #[error("{resource}: {message}")]
    ResourceFailed { resource: String, message: String },

    /// Resource not found in the cluster
    #[error("resource {0} not found")]
    ResourceNotFound(String),

    /// Resource belongs to another release
    #[error("resource {resource} is owned by release '{owner}'")]
    OwnershipMismatch { resource: String, owner: String },

    /// Resource exists without release ownership metadata
    #[error("resource {resource} already exists and cannot be imported into release '{release}': missing ownership metadata")]
    ExistingResourceConflict { resource: String, release: String },

    /// Namespace deletion after purge failed
    #[error("unable to delete namespace {namespace}: {message}")]
    NamespaceDeletion { namespace: String, message: String },

    /// Hook execution failed
    #[error("hook '{hook}' failed during {event}: {message}")]
    HookFailed {
        hook: String,
        event: String,
        message: String,
    },

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::ResourceNotFound(_) => true,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Index of the stage a rollout error happened in
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            KubeError::ExternalDependencies { stage, .. }
            | KubeError::StageApply { stage, .. }
            | KubeError::StageTrack { stage, .. }
            | KubeError::StageNotApplied { stage } => Some(*stage),
            _ => None,
        }
    }
}

/// Join error messages the way aggregated failures are reported
pub(crate) fn join_errors(errors: &[KubeError], separator: &str) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_index() {
        let err = KubeError::StageApply {
            stage: 2,
            source: Box::new(KubeError::Timeout("5m".to_string())),
        };
        assert_eq!(err.stage_index(), Some(2));
        assert_eq!(
            err.to_string(),
            "error applying resources: operation timed out after 5m"
        );

        assert_eq!(KubeError::Storage("x".to_string()).stage_index(), None);
    }

    #[test]
    fn test_is_not_found() {
        assert!(KubeError::ResourceNotFound("default:ConfigMap/a".to_string()).is_not_found());
        assert!(!KubeError::Timeout("1s".to_string()).is_not_found());
    }

    #[test]
    fn test_join_errors() {
        let errs = vec![
            KubeError::ResourceNotFound("a".to_string()),
            KubeError::Timeout("1s".to_string()),
        ];
        assert_eq!(
            join_errors(&errs, "; "),
            "resource a not found; operation timed out after 1s"
        );
    }
}
