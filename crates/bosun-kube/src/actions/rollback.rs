//! Roll a release back to an earlier revision
//!
//! A rollback never rewrites history: it creates a new revision on top of
//! the latest one that carries the manifest and hooks of the chosen revision.

use std::time::Duration;

use bosun_core::{Diagnostics, Release, validate_release_name};
use tracing::info;

use super::{ActionOutcome, Configuration, DeployParams, Operation};
use crate::error::{KubeError, Result};

/// Options for rollback operation
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Target revision (0 = previous)
    pub revision: u32,

    /// Wait for resources to be ready
    pub wait: bool,

    /// Also wait for Jobs to complete
    pub wait_for_jobs: bool,

    /// Timeout for wait
    pub timeout: Option<Duration>,

    /// Replace changed resources instead of patching them
    pub force: bool,

    /// Skip hooks
    pub no_hooks: bool,

    /// Dry run mode
    pub dry_run: bool,

    /// Recreate pods (restart updated workloads)
    pub recreate_pods: bool,

    /// Delete what the failing stage created
    pub cleanup_on_fail: bool,

    /// Maximum history to keep
    pub max_history: Option<u32>,

    /// Description for this rollback
    pub description: Option<String>,
}

impl RollbackOptions {
    /// Create default rollback options
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set target revision
    pub fn to_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// Enable force mode
    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Wait for rollback
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = Some(timeout);
        self
    }

    pub fn with_wait_for_jobs(mut self, timeout: Duration) -> Self {
        self.wait_for_jobs = true;
        self.with_wait(timeout)
    }

    pub fn with_recreate_pods(mut self) -> Self {
        self.recreate_pods = true;
        self
    }

    pub fn with_cleanup_on_fail(mut self) -> Self {
        self.cleanup_on_fail = true;
        self
    }

    pub fn with_max_history(mut self, max_history: u32) -> Self {
        self.max_history = Some(max_history);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.no_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    fn deploy_params(&self, config: &Configuration) -> DeployParams {
        let defaults = DeployParams::from_settings(config.settings());
        DeployParams {
            wait: self.wait || defaults.wait,
            wait_for_jobs: self.wait_for_jobs || defaults.wait_for_jobs,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            force: self.force,
            recreate_pods: self.recreate_pods,
            cleanup_on_fail: self.cleanup_on_fail,
            no_hooks: self.no_hooks,
            max_history: self.max_history.unwrap_or(defaults.max_history),
            description: self.description.clone(),
        }
    }
}

impl Configuration {
    /// Roll back to `options.revision`, or to the revision before the latest
    ///
    /// On failure the new revision is marked Failed and the latest one
    /// Superseded.
    pub async fn rollback(&self, options: &RollbackOptions) -> Result<ActionOutcome> {
        if !options.dry_run {
            self.cluster().is_reachable().await?;
        }

        info!(release = %options.name, "preparing rollback");
        let (current, target) = self.prepare_rollback(options).await?;

        let mut diagnostics = Diagnostics::new();
        let phase = self.plan(target, &mut diagnostics)?;
        if options.dry_run {
            info!(release = %options.name, "dry run rollback");
            return Ok(ActionOutcome::planned(phase, diagnostics));
        }

        info!(
            release = %options.name,
            version = phase.release().version,
            "creating rolled back release"
        );
        self.storage().create(phase.release()).await?;

        let params = options.deploy_params(self);
        self.deploy(
            Operation::Rollback,
            phase,
            Some(current),
            &params,
            diagnostics,
        )
        .await
    }

    /// Latest revision and the new revision restoring the requested one
    async fn prepare_rollback(&self, options: &RollbackOptions) -> Result<(Release, Release)> {
        validate_release_name(&options.name)?;

        let history = self
            .storage()
            .history(&options.namespace, &options.name)
            .await?;
        let current = history
            .last()
            .cloned()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: options.name.clone(),
                namespace: options.namespace.clone(),
            })?;

        let revision = match options.revision {
            0 => current.version.saturating_sub(1),
            revision => revision,
        };
        let previous = history
            .iter()
            .find(|r| r.version == revision)
            .ok_or_else(|| KubeError::RevisionNotFound {
                name: options.name.clone(),
                revision,
            })?;

        info!(
            release = %options.name,
            current = current.version,
            target = revision,
            "rolling back"
        );
        let target = Release::for_rollback(&current, previous);
        Ok((current, target))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, configmaps};
    use super::*;
    use crate::cluster::{ClusterCall, ClusterClient};
    use crate::storage::StorageDriver;
    use bosun_core::{DeployReport, ReleaseStatus};
    use tempfile::TempDir;

    fn revision(version: u32, status: ReleaseStatus, names: &[&str]) -> Release {
        let mut r = Release::for_install("demo", "default", configmaps(names));
        r.version = version;
        r.set_rollout_phase(0);
        r.mark_deployed("done");
        r.info.status = status;
        r
    }

    /// v1 {a} superseded, v2 {b} deployed and live
    async fn two_revisions(h: &Harness) {
        h.storage
            .create(&revision(1, ReleaseStatus::Superseded, &["a"]))
            .await
            .unwrap();
        let v2 = revision(2, ReleaseStatus::Deployed, &["b"]);
        h.storage.create(&v2).await.unwrap();
        h.cluster
            .seed(&h.cluster.build(&v2.manifest, "default").unwrap());
    }

    fn statuses(history: &[Release]) -> Vec<ReleaseStatus> {
        history.iter().map(|r| r.info.status).collect()
    }

    #[tokio::test]
    async fn test_rollback_to_previous() {
        let h = Harness::new();
        two_revisions(&h).await;

        let outcome = h
            .config
            .rollback(&RollbackOptions::new("demo", "default"))
            .await
            .unwrap();

        let release = &outcome.release;
        assert_eq!(release.version, 3);
        assert_eq!(release.manifest, configmaps(&["a"]));
        assert_eq!(release.info.status, ReleaseStatus::Deployed);
        assert_eq!(release.info.description, "Rollback to 1");

        let history = h.storage.history("default", "demo").await.unwrap();
        assert_eq!(
            statuses(&history),
            vec![
                ReleaseStatus::Superseded,
                ReleaseStatus::Superseded,
                ReleaseStatus::Deployed
            ]
        );
        assert_eq!(h.cluster.live_names(), vec!["default:ConfigMap/a"]);
    }

    #[tokio::test]
    async fn test_rollback_recreates_updated_pods() {
        let h = Harness::new();
        h.storage
            .create(&revision(1, ReleaseStatus::Superseded, &["a", "b"]))
            .await
            .unwrap();
        let v2 = revision(2, ReleaseStatus::Deployed, &["b"]);
        h.storage.create(&v2).await.unwrap();
        h.cluster
            .seed(&h.cluster.build(&v2.manifest, "default").unwrap());

        let options = RollbackOptions::new("demo", "default")
            .to_revision(1)
            .with_recreate_pods();
        let outcome = h.config.rollback(&options).await.unwrap();

        assert_eq!(outcome.release.version, 3);
        assert_eq!(outcome.release.info.description, "Rollback to 1");
        assert_eq!(
            h.cluster.calls(),
            vec![
                ClusterCall::Update {
                    current: vec!["default:ConfigMap/b".to_string()],
                    target: vec![
                        "default:ConfigMap/a".to_string(),
                        "default:ConfigMap/b".to_string()
                    ],
                    force: false,
                },
                ClusterCall::RecreatePods(vec!["default:ConfigMap/b".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_twice_restores_later_revision() {
        let h = Harness::new();
        two_revisions(&h).await;
        h.config
            .rollback(&RollbackOptions::new("demo", "default"))
            .await
            .unwrap();
        h.cluster.reset_calls();

        let outcome = h
            .config
            .rollback(&RollbackOptions::new("demo", "default").to_revision(2))
            .await
            .unwrap();

        assert_eq!(outcome.release.version, 4);
        assert_eq!(outcome.release.info.description, "Rollback to 2");
        assert_eq!(
            h.cluster.calls(),
            vec![
                ClusterCall::Create(vec!["default:ConfigMap/b".to_string()]),
                ClusterCall::Delete(vec!["default:ConfigMap/a".to_string()]),
                ClusterCall::WaitForDelete(vec!["default:ConfigMap/a".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_missing_revision() {
        let h = Harness::new();
        two_revisions(&h).await;

        let err = h
            .config
            .rollback(&RollbackOptions::new("demo", "default").to_revision(7))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "release 'demo' has no 7 version");
        assert_eq!(h.storage.release_count(), 2);
    }

    #[tokio::test]
    async fn test_rollback_failure_supersedes_current() {
        let h = Harness::new();
        two_revisions(&h).await;
        h.cluster.fail_apply_of("default:ConfigMap/a");

        let err = h
            .config
            .rollback(&RollbackOptions::new("demo", "default"))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::StageApply { stage: 0, .. }));
        let history = h.storage.history("default", "demo").await.unwrap();
        assert_eq!(
            statuses(&history),
            vec![
                ReleaseStatus::Superseded,
                ReleaseStatus::Superseded,
                ReleaseStatus::Failed
            ]
        );
        assert!(history[2].info.description.starts_with("Rollback \"demo\" failed"));
    }

    #[tokio::test]
    async fn test_rollback_cleanup_failure_is_reported() {
        let h = Harness::new();
        h.storage
            .create(&revision(1, ReleaseStatus::Superseded, &["a", "c"]))
            .await
            .unwrap();
        h.storage
            .create(&revision(2, ReleaseStatus::Deployed, &[]))
            .await
            .unwrap();
        h.cluster.fail_apply_of("default:ConfigMap/c");
        h.cluster.fail_delete_of("default:ConfigMap/a");

        let err = h
            .config
            .rollback(&RollbackOptions::new("demo", "default").with_cleanup_on_fail())
            .await
            .unwrap_err();

        let KubeError::CleanupFailed {
            operation,
            original,
            ..
        } = &err
        else {
            panic!("unexpected error: {}", err);
        };
        assert_eq!(operation, "rollback");
        assert!(original.starts_with("error applying resources"));
        assert!(err.to_string().starts_with(
            "an error occurred while cleaning up resources. original rollback error:"
        ));
        assert!(h.cluster.is_live("default:ConfigMap/a"));
    }

    #[tokio::test]
    async fn test_rollback_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.json");
        let h = Harness::new().with_report_path(&path);
        two_revisions(&h).await;
        h.cluster.reset_calls();
        h.storage.reset_counts();

        let outcome = h
            .config
            .rollback(&RollbackOptions::new("demo", "default").dry_run())
            .await
            .unwrap();

        assert_eq!(outcome.release.info.status, ReleaseStatus::PendingRollback);
        assert!(h.cluster.calls().is_empty());
        assert_eq!(h.storage.operation_counts().creates, 0);
        assert_eq!(h.storage.release_count(), 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_rollback_writes_report() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.json");
        let h = Harness::new().with_report_path(&path);
        two_revisions(&h).await;

        h.config
            .rollback(&RollbackOptions::new("demo", "default"))
            .await
            .unwrap();

        let report: DeployReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.revision, 3);
        assert_eq!(report.status, ReleaseStatus::Deployed);
    }
}
