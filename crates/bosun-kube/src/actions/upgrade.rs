//! Upgrade a release to newly rendered content

use std::collections::HashMap;
use std::time::Duration;

use bosun_core::{Diagnostics, Release, ReleaseStatus, active_revision, validate_release_name};
use tracing::{debug, info, warn};

use super::{
    ActionOutcome, Configuration, DeployParams, InstallOptions, Operation, ReleaseContent,
};
use crate::error::{KubeError, Result};

/// Options for upgrade operation
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Wait for resources to be ready
    pub wait: bool,

    /// Also wait for Jobs to complete
    pub wait_for_jobs: bool,

    /// Timeout for waits and hooks, defaults to the configured one
    pub timeout: Option<Duration>,

    /// Install if release doesn't exist
    pub install: bool,

    /// Replace changed resources instead of patching them
    pub force: bool,

    /// Restart the pods of updated workloads
    pub recreate_pods: bool,

    /// Delete what the failing stage created
    pub cleanup_on_fail: bool,

    /// Skip hooks
    pub no_hooks: bool,

    /// Dry run mode
    pub dry_run: bool,

    /// Maximum history to keep
    pub max_history: Option<u32>,

    /// Custom labels to add
    pub labels: HashMap<String, String>,

    /// Description for this revision
    pub description: Option<String>,
}

impl UpgradeOptions {
    /// Create default upgrade options
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Enable install-if-not-exists
    pub fn with_install(mut self) -> Self {
        self.install = true;
        self
    }

    /// Enable force mode
    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_recreate_pods(mut self) -> Self {
        self.recreate_pods = true;
        self
    }

    /// Wait for upgrade
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = Some(timeout);
        self
    }

    /// Wait for Jobs as well (implies waiting)
    pub fn with_wait_for_jobs(mut self, timeout: Duration) -> Self {
        self.wait_for_jobs = true;
        self.with_wait(timeout)
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

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Options used when the upgrade falls back to an install
    ///
    /// `force` and `recreate_pods` do not apply to an install.
    fn as_install(&self) -> InstallOptions {
        InstallOptions {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            wait: self.wait,
            wait_for_jobs: self.wait_for_jobs,
            timeout: self.timeout,
            replace: false,
            cleanup_on_fail: self.cleanup_on_fail,
            no_hooks: self.no_hooks,
            dry_run: self.dry_run,
            max_history: self.max_history,
            labels: self.labels.clone(),
            description: self.description.clone(),
        }
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
    /// Upgrade a release to `content`
    ///
    /// Refused while the last revision is still pending. A missing or
    /// uninstalled release is installed instead when `install` is set.
    pub async fn upgrade(
        &self,
        options: &UpgradeOptions,
        content: ReleaseContent,
    ) -> Result<ActionOutcome> {
        validate_release_name(&options.name)?;
        if !options.dry_run {
            self.cluster().is_reachable().await?;
        }

        let history = self
            .history_or_empty(&options.namespace, &options.name)
            .await?;
        let Some(last) = history.last() else {
            if options.install {
                info!(release = %options.name, "release does not exist, installing it now");
                return self.install(&options.as_install(), content).await;
            }
            return Err(KubeError::ReleaseNotFound {
                name: options.name.clone(),
                namespace: options.namespace.clone(),
            });
        };

        match last.info.status {
            status if status.is_pending() => {
                return Err(KubeError::OperationInProgress {
                    name: options.name.clone(),
                    status: status.to_string(),
                });
            }
            ReleaseStatus::Uninstalled if options.install => {
                info!(release = %options.name, "release was uninstalled, installing it again");
                let install = options.as_install().with_replace();
                return self.install(&install, content).await;
            }
            ReleaseStatus::Uninstalled => {
                return Err(KubeError::NoDeployedReleases {
                    name: options.name.clone(),
                });
            }
            _ => {}
        }

        match active_revision(&history) {
            Some(current) => debug!(release = %options.name, from = current.version, "upgrading"),
            None => warn!(
                release = %options.name,
                last = last.version,
                "no deployed revision, upgrading from the last one"
            ),
        }

        let mut target = Release::for_upgrade(last, content.manifest);
        target.hooks = content.hooks;
        target.info.notes = content.notes;
        target.labels.extend(options.labels.clone());

        let mut diagnostics = Diagnostics::new();
        let phase = self.plan(target, &mut diagnostics)?;
        if options.dry_run {
            info!(release = %options.name, "dry run upgrade");
            return Ok(ActionOutcome::planned(phase, diagnostics));
        }

        self.storage().create(phase.release()).await?;
        let params = options.deploy_params(self);
        self.deploy(Operation::Upgrade, phase, None, &params, diagnostics)
            .await
    }
}
