//! Install a new release

use std::collections::HashMap;
use std::time::Duration;

use bosun_core::{Diagnostics, Release, ReleaseStatus, validate_release_name};
use tracing::info;

use super::{ActionOutcome, Configuration, DeployParams, Operation, ReleaseContent};
use crate::error::{KubeError, Result};

/// Options for install operation
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
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

    /// Re-use the name of a release that was uninstalled with its history
    /// kept or whose last revision failed
    pub replace: bool,

    /// Delete what the failing stage created
    pub cleanup_on_fail: bool,

    /// Skip pre/post-install hooks
    pub no_hooks: bool,

    /// Dry run mode (don't actually apply)
    pub dry_run: bool,

    /// Maximum history to keep when `replace` continues an old sequence
    pub max_history: Option<u32>,

    /// Custom labels to add to the release
    pub labels: HashMap<String, String>,

    /// Description for this release
    pub description: Option<String>,
}

impl InstallOptions {
    /// Create default install options with name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Enable waiting for resources
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

    pub fn with_replace(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn with_cleanup_on_fail(mut self) -> Self {
        self.cleanup_on_fail = true;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.no_hooks = true;
        self
    }

    pub fn with_max_history(mut self, max_history: u32) -> Self {
        self.max_history = Some(max_history);
        self
    }

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn deploy_params(&self, config: &Configuration) -> DeployParams {
        let defaults = DeployParams::from_settings(config.settings());
        DeployParams {
            wait: self.wait || defaults.wait,
            wait_for_jobs: self.wait_for_jobs || defaults.wait_for_jobs,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            cleanup_on_fail: self.cleanup_on_fail,
            no_hooks: self.no_hooks,
            max_history: self.max_history.unwrap_or(defaults.max_history),
            description: self.description.clone(),
            ..defaults
        }
    }
}

impl Configuration {
    /// Install `content` as a new release
    ///
    /// A name with history is refused unless `replace` is set and the last
    /// revision is Uninstalled or Failed, in which case the new revision
    /// continues the version sequence.
    pub async fn install(
        &self,
        options: &InstallOptions,
        content: ReleaseContent,
    ) -> Result<ActionOutcome> {
        validate_release_name(&options.name)?;
        if !options.dry_run {
            self.cluster().is_reachable().await?;
        }

        let history = self
            .history_or_empty(&options.namespace, &options.name)
            .await?;
        let version = match history.last() {
            None => 1,
            Some(last)
                if options.replace
                    && matches!(
                        last.info.status,
                        ReleaseStatus::Uninstalled | ReleaseStatus::Failed
                    ) =>
            {
                last.version + 1
            }
            Some(_) => {
                return Err(KubeError::NameInUse {
                    name: options.name.clone(),
                });
            }
        };

        let mut target = Release::for_install(&options.name, &options.namespace, content.manifest);
        target.version = version;
        target.hooks = content.hooks;
        target.info.notes = content.notes;
        target.labels = options.labels.clone();

        let mut diagnostics = Diagnostics::new();
        let phase = self.plan(target, &mut diagnostics)?;
        if options.dry_run {
            info!(release = %options.name, "dry run install");
            return Ok(ActionOutcome::planned(phase, diagnostics));
        }

        self.storage().create(phase.release()).await?;
        let params = options.deploy_params(self);
        self.deploy(Operation::Install, phase, None, &params, diagnostics)
            .await
    }
}
