//! Uninstall a release
//!
//! What gets deleted is reconstructed from the release history, the cluster
//! is never listed. Resources with a keep resource policy are left in place
//! and reported.

use std::sync::Arc;
use std::time::Duration;

use bosun_core::{HookEvent, Release, ReleaseStatus, validate_release_name};
use tracing::{debug, info, warn};

use super::Configuration;
use crate::cluster::{DeleteOptions, DeletionCascade};
use crate::error::{KubeError, Result, join_errors};
use crate::hooks::{HookExecutor, HookResult};
use crate::phases::DeployedResourcesCalculator;
use crate::resource::{ResourceInfo, ResourceList};

/// Options for uninstall operation
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Wait for resources to be deleted
    pub wait: bool,

    /// Timeout for wait
    pub timeout: Option<Duration>,

    /// Keep release history (don't delete storage)
    pub keep_history: bool,

    /// Treat a missing release as success
    pub ignore_not_found: bool,

    /// Skip pre/post-delete hooks
    pub no_hooks: bool,

    /// Dry run mode
    pub dry_run: bool,

    /// Cascade deletion (delete dependents)
    pub cascade: DeletionCascade,

    /// Also delete the hook resources of every revision
    pub delete_hooks: bool,

    /// Delete the release namespace once the release is purged
    pub delete_namespace: bool,

    /// Description for the uninstall
    pub description: Option<String>,
}

impl UninstallOptions {
    /// Create default uninstall options
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cascade: DeletionCascade::Background,
            ..Default::default()
        }
    }

    /// Keep history after uninstall
    pub fn keep_history(mut self) -> Self {
        self.keep_history = true;
        self
    }

    /// Wait for deletion
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = Some(timeout);
        self
    }

    pub fn ignore_not_found(mut self) -> Self {
        self.ignore_not_found = true;
        self
    }

    pub fn with_cascade(mut self, cascade: DeletionCascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_delete_hooks(mut self) -> Self {
        self.delete_hooks = true;
        self
    }

    /// Delete the namespace after purging; ignored with `keep_history`
    pub fn with_delete_namespace(mut self) -> Self {
        self.delete_namespace = true;
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
}

/// Result of an uninstall
#[derive(Debug, Clone, Default)]
pub struct UninstallOutcome {
    /// Final state of the latest revision, `None` when there was no release
    pub release: Option<Release>,

    /// Resources deleted (or, in a dry run, that would be deleted)
    pub deleted: ResourceList,

    /// Resources left in place because of their resource policy
    pub kept: ResourceList,

    pub hooks: Vec<HookResult>,
}

impl UninstallOutcome {
    fn for_release(release: Release) -> Self {
        Self {
            release: Some(release),
            ..Default::default()
        }
    }

    /// Message listing the kept resources, if any
    pub fn kept_message(&self) -> Option<String> {
        if self.kept.is_empty() {
            return None;
        }
        let mut message = "These resources were kept due to the resource policy:\n".to_string();
        for info in &self.kept {
            message.push_str(&format!("[{}] {}\n", info.kind(), info.name));
        }
        Some(message)
    }
}

impl Configuration {
    /// Uninstall a release
    ///
    /// Without `keep_history` every revision is purged from the store,
    /// otherwise the latest revision is kept as Uninstalled. Failures after
    /// the resources were deleted are collected into one error.
    pub async fn uninstall(&self, options: &UninstallOptions) -> Result<UninstallOutcome> {
        let timeout = options.timeout.unwrap_or(self.settings().timeout);

        if options.dry_run {
            return self.uninstall_dry_run(options).await;
        }

        self.cluster().is_reachable().await?;
        validate_release_name(&options.name)?;

        let history = match self
            .storage()
            .history(&options.namespace, &options.name)
            .await
        {
            Ok(history) => history,
            Err(KubeError::ReleaseNotFound { .. }) if options.ignore_not_found => {
                info!(release = %options.name, "no such release");
                if options.delete_namespace && !options.keep_history {
                    self.delete_release_namespace(options, timeout).await?;
                }
                return Ok(UninstallOutcome::default());
            }
            Err(e) => return Err(e),
        };
        let Some(mut release) = history.last().cloned() else {
            return Err(KubeError::ReleaseNotFound {
                name: options.name.clone(),
                namespace: options.namespace.clone(),
            });
        };

        if release.info.status == ReleaseStatus::Uninstalled {
            if options.ignore_not_found {
                return Ok(UninstallOutcome::for_release(release));
            }
            if !options.keep_history {
                self.storage()
                    .delete_all(&options.namespace, &options.name)
                    .await?;
                if options.delete_namespace {
                    self.delete_release_namespace(options, timeout).await?;
                }
                return Ok(UninstallOutcome::for_release(release));
            }
            return Err(KubeError::AlreadyDeleted(options.name.clone()));
        }
        if !release.info.status.is_uninstallable() {
            warn!(
                release = %options.name,
                status = %release.info.status,
                "uninstalling a release with an operation in progress"
            );
        }

        info!(release = %options.name, version = release.version, "uninstall: deleting");
        release.mark_uninstalling();
        let mut outcome = UninstallOutcome::default();

        if options.no_hooks {
            debug!(release = %options.name, "delete hooks disabled");
        } else {
            self.run_delete_hooks(&mut release, HookEvent::PreDelete, timeout, &mut outcome)
                .await?;
        }

        let deployed = DeployedResourcesCalculator::new(
            history.clone(),
            self.cluster(),
            Arc::clone(&self.splitter),
        )
        .calculate()?;

        release.set_uninstall_phase();
        if let Err(error) = self.storage().update(&release).await {
            warn!(release = %options.name, %error, "uninstall: failed to store updated release");
        }

        outcome.kept = deployed.filter(|info| info.has_keep_policy());
        let to_delete = deployed.filter(|info| !info.has_keep_policy());
        let delete_options = DeleteOptions {
            wait: true,
            wait_timeout: Some(timeout),
            skip_if_invalid_ownership: true,
            cascade: options.cascade,
            ..DeleteOptions::for_release(&release.name, &release.namespace)
        };
        let (deleted, errors) = self.cluster().delete(&to_delete, &delete_options).await;
        if !errors.is_empty() {
            for error in &errors {
                warn!(release = %options.name, %error, "uninstall: failed to delete resource");
            }
            return Err(KubeError::UninstallIncomplete {
                count: errors.len(),
                message: join_errors(&errors, "; "),
            });
        }
        outcome.deleted = deleted.deleted;
        if let Some(message) = outcome.kept_message() {
            info!(release = %options.name, "{}", message.trim_end());
        }

        let mut errors = Vec::new();
        if options.wait {
            if let Err(error) = self.cluster().wait_for_delete(&to_delete, timeout).await {
                errors.push(error);
            }
        }

        if !options.no_hooks {
            if let Err(error) = self
                .run_delete_hooks(&mut release, HookEvent::PostDelete, timeout, &mut outcome)
                .await
            {
                errors.push(error);
            }
        }

        if options.delete_hooks {
            errors.extend(self.delete_hook_resources(&history, timeout).await);
        }

        let description = options
            .description
            .clone()
            .unwrap_or_else(|| "Uninstallation complete".to_string());
        release.mark_uninstalled(description);

        if options.keep_history {
            if let Err(error) = self.storage().update(&release).await {
                warn!(release = %options.name, %error, "uninstall: failed to store release");
            }
        } else {
            info!(release = %options.name, "purge requested");
            if let Err(error) = self
                .storage()
                .delete_all(&options.namespace, &options.name)
                .await
            {
                errors.push(error);
            }
        }

        if !errors.is_empty() {
            return Err(KubeError::UninstallIncomplete {
                count: errors.len(),
                message: join_errors(&errors, "; "),
            });
        }
        if options.delete_namespace && !options.keep_history {
            self.delete_release_namespace(options, timeout).await?;
        }

        info!(release = %options.name, deleted = outcome.deleted.len(), "uninstalled");
        outcome.release = Some(release);
        Ok(outcome)
    }

    /// Latest revision and what an uninstall would delete, without side effects
    async fn uninstall_dry_run(&self, options: &UninstallOptions) -> Result<UninstallOutcome> {
        let history = match self
            .storage()
            .history(&options.namespace, &options.name)
            .await
        {
            Ok(history) => history,
            Err(KubeError::ReleaseNotFound { .. }) if options.ignore_not_found => {
                info!(release = %options.name, "no such release");
                return Ok(UninstallOutcome::default());
            }
            Err(e) => return Err(e),
        };
        let release = history.last().cloned();

        let deployed =
            DeployedResourcesCalculator::new(history, self.cluster(), Arc::clone(&self.splitter))
                .calculate()?;
        Ok(UninstallOutcome {
            release,
            deleted: deployed.filter(|info| !info.has_keep_policy()),
            kept: deployed.filter(|info| info.has_keep_policy()),
            hooks: Vec::new(),
        })
    }

    /// Delete the hook resources recorded in every revision
    async fn delete_hook_resources(
        &self,
        history: &[Release],
        timeout: Duration,
    ) -> Vec<KubeError> {
        let mut errors = Vec::new();
        let mut resources = ResourceList::new();
        for revision in history {
            for hook in &revision.hooks {
                match self.cluster().build(&hook.manifest, &revision.namespace) {
                    Ok(built) => resources.merge(built),
                    Err(error) => errors.push(error),
                }
            }
        }
        if resources.is_empty() {
            return errors;
        }

        let Some(latest) = history.last() else {
            return errors;
        };
        debug!(release = %latest.name, count = resources.len(), "deleting hook resources");
        let delete_options = DeleteOptions {
            wait: true,
            wait_timeout: Some(timeout),
            skip_if_invalid_ownership: true,
            ..DeleteOptions::for_release(&latest.name, &latest.namespace)
        };
        let (_, delete_errors) = self.cluster().delete(&resources, &delete_options).await;
        errors.extend(delete_errors);
        errors
    }

    async fn delete_release_namespace(
        &self,
        options: &UninstallOptions,
        timeout: Duration,
    ) -> Result<()> {
        let mapping = self.mapper.resolve_type("namespace")?;
        let namespace = ResourceInfo::new(&mapping, options.namespace.as_str(), None);
        let delete_options = DeleteOptions {
            wait: true,
            wait_timeout: Some(timeout),
            ..DeleteOptions::for_release(&options.name, &options.namespace)
        };
        let (result, errors) = self
            .cluster()
            .delete(&ResourceList::from(vec![namespace]), &delete_options)
            .await;
        if !errors.is_empty() {
            return Err(KubeError::NamespaceDeletion {
                namespace: options.namespace.clone(),
                message: join_errors(&errors, "; "),
            });
        }
        if result.deleted.is_empty() {
            info!(namespace = %options.namespace, "no such namespace");
        } else {
            info!(namespace = %options.namespace, "namespace deleted");
        }
        Ok(())
    }

    /// Run delete hooks without moving the rollout checkpoint
    async fn run_delete_hooks(
        &self,
        release: &mut Release,
        event: HookEvent,
        timeout: Duration,
        outcome: &mut UninstallOutcome,
    ) -> Result<()> {
        let mut executor =
            HookExecutor::new(self.hooks.as_ref(), self.storage(), timeout).without_checkpoint();
        let result = executor.execute(release, event).await;
        outcome.hooks.append(&mut executor.results);
        result
    }
}
