//! Release actions: install, upgrade, rollback and uninstall
//!
//! Install, upgrade and rollback share one deploy path. The target revision
//! is split into stages before anything is written, stored as pending, rolled
//! out stage by stage by a [`RolloutPhaseManager`] and finally marked
//! Deployed or Failed. Uninstall deletes what the history says is live.

mod install;
mod rollback;
mod uninstall;
mod upgrade;

pub use install::InstallOptions;
pub use rollback::RollbackOptions;
pub use uninstall::{UninstallOptions, UninstallOutcome};
pub use upgrade::UpgradeOptions;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bosun_core::{DeployReport, Diagnostics, Hook, HookEvent, Release, Settings};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, DeleteOptions, UpdateOptions, foreign_owner};
use crate::error::{KubeError, Result, join_errors};
use crate::hooks::{HookExecutor, HookResult, HookRunner, NoopHookRunner};
use crate::mapping::TypeMapper;
use crate::phases::{
    ExternalDepsGenerator, NoExternalDepsGenerator, RolloutPhase, RolloutPhaseManager, Splitter,
    StageHandler, splitter_for,
};
use crate::resource::ResourceList;
use crate::stages::{SortedStageList, Stage};
use crate::storage::{FileDriver, StorageDriver, prune_history};

/// Rendered content of a revision
#[derive(Debug, Clone, Default)]
pub struct ReleaseContent {
    /// All non-hook resources
    pub manifest: String,
    pub hooks: Vec<Hook>,
    pub notes: Option<String>,
}

impl ReleaseContent {
    pub fn new(manifest: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            ..Default::default()
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Hook>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Result of a successful (or dry-run) install, upgrade or rollback
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub release: Release,

    /// Planned stages; outcomes are set for the stages applied in this run
    pub stages: SortedStageList,

    /// Notes from external dependency resolution
    pub diagnostics: Diagnostics,

    pub hooks: Vec<HookResult>,

    /// Failures after the rollout succeeded (orphan cleanup, post hooks, superseding, pruning)
    pub warnings: Vec<String>,
}

impl ActionOutcome {
    fn planned(phase: RolloutPhase, diagnostics: Diagnostics) -> Self {
        let (release, stages) = phase.into_parts();
        Self {
            release,
            stages,
            diagnostics,
            hooks: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn report(&self) -> DeployReport {
        DeployReport::from_release(&self.release)
    }

    /// Whether the action finished without warnings
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Operation a deploy is performed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Install,
    Upgrade,
    Rollback,
}

impl Operation {
    fn pre_event(self) -> HookEvent {
        match self {
            Self::Install => HookEvent::PreInstall,
            Self::Upgrade => HookEvent::PreUpgrade,
            Self::Rollback => HookEvent::PreRollback,
        }
    }

    fn post_event(self) -> HookEvent {
        match self {
            Self::Install => HookEvent::PostInstall,
            Self::Upgrade => HookEvent::PostUpgrade,
            Self::Rollback => HookEvent::PostRollback,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Rollback => "rollback",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::Upgrade => "Upgrade",
            Self::Rollback => "Rollback",
        }
    }
}

/// Knobs of the deploy path, resolved from action options and [`Settings`]
#[derive(Debug, Clone)]
pub(crate) struct DeployParams {
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    pub force: bool,
    pub recreate_pods: bool,
    pub cleanup_on_fail: bool,
    pub no_hooks: bool,
    /// Revisions kept after a successful deploy (0 = unlimited)
    pub max_history: u32,
    /// Replaces the default description of a deployed revision
    pub description: Option<String>,
}

impl DeployParams {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            wait: settings.wait,
            wait_for_jobs: settings.wait_for_jobs,
            timeout: settings.timeout,
            force: false,
            recreate_pods: false,
            cleanup_on_fail: false,
            no_hooks: false,
            max_history: settings.max_history,
            description: None,
        }
    }
}

/// [`StageHandler`] used by install, upgrade and rollback
///
/// Stages with nothing previously deployed are created, others are updated
/// against what the history says is live. New resources that already exist
/// are adopted when this release owns them and rejected otherwise. Waits
/// only happen when `wait` is set.
pub struct DeployStageHandler<'a> {
    cluster: &'a dyn ClusterClient,
    release_name: &'a str,
    release_namespace: &'a str,
    params: &'a DeployParams,
}

impl<'a> DeployStageHandler<'a> {
    pub(crate) fn new(
        cluster: &'a dyn ClusterClient,
        release_name: &'a str,
        release_namespace: &'a str,
        params: &'a DeployParams,
    ) -> Self {
        Self {
            cluster,
            release_name,
            release_namespace,
            params,
        }
    }

    /// Existing objects among `resources` that this release already owns
    async fn adoptable(&self, resources: &ResourceList) -> Result<ResourceList> {
        let mut adopted = ResourceList::new();
        for info in resources {
            let Some(live) = self.cluster.get(info).await? else {
                continue;
            };
            if live.owner_release().is_none() {
                return Err(KubeError::ExistingResourceConflict {
                    resource: info.to_string(),
                    release: self.release_name.to_string(),
                });
            }
            if let Some(owner) = foreign_owner(&live, self.release_name, self.release_namespace) {
                return Err(KubeError::OwnershipMismatch {
                    resource: info.to_string(),
                    owner,
                });
            }
            debug!(resource = %info, "adopting existing resource");
            adopted.push(info.clone());
        }
        Ok(adopted)
    }

    async fn wait_for(&self, resources: &ResourceList) -> Result<()> {
        if self.params.wait_for_jobs {
            self.cluster
                .wait_with_jobs(resources, self.params.timeout)
                .await
        } else {
            self.cluster.wait(resources, self.params.timeout).await
        }
    }
}

#[async_trait]
impl StageHandler for DeployStageHandler<'_> {
    async fn track_external_deps(&self, index: usize, stage: &Stage) -> Result<()> {
        if stage.external_dependencies.is_empty() || !self.params.wait {
            return Ok(());
        }
        debug!(
            stage = index,
            count = stage.external_dependencies.len(),
            "waiting for external dependencies"
        );
        self.wait_for(&stage.external_dependencies.as_resource_list())
            .await
    }

    async fn apply(
        &self,
        index: usize,
        stage: &mut Stage,
        previously_deployed: &ResourceList,
    ) -> Result<()> {
        let new = stage.desired_resources.difference(previously_deployed);
        let mut current = previously_deployed.clone();
        current.merge(self.adoptable(&new).await?);

        let applied = if current.is_empty() {
            self.cluster.create(&stage.desired_resources).await
        } else {
            let options = UpdateOptions {
                skip_delete_if_invalid_ownership: true,
                ignore_ownership_mismatch: false,
                release_name: self.release_name.to_string(),
                release_namespace: self.release_namespace.to_string(),
            };
            self.cluster
                .update(
                    &current,
                    &stage.desired_resources,
                    self.params.force,
                    &options,
                )
                .await
        };

        let result = match applied {
            Ok(result) => result,
            Err(partial) => {
                stage.result = Some(partial.result);
                return Err(partial.error);
            }
        };

        if self.params.recreate_pods && !result.updated.is_empty() {
            // Not critical for the release, the user can restart by hand.
            if let Err(error) = self.cluster.recreate_pods(&result.updated).await {
                warn!(stage = index, %error, "unable to recreate pods");
            }
        }

        debug!(
            stage = index,
            created = result.created.len(),
            updated = result.updated.len(),
            deleted = result.deleted.len(),
            "stage applied"
        );
        stage.result = Some(result);
        Ok(())
    }

    async fn track(&self, _index: usize, stage: &Stage) -> Result<()> {
        if !self.params.wait {
            return Ok(());
        }
        self.wait_for(&stage.desired_resources).await
    }
}

/// Collaborators and defaults shared by all actions
pub struct Configuration {
    storage: Arc<dyn StorageDriver>,
    cluster: Arc<dyn ClusterClient>,
    hooks: Arc<dyn HookRunner>,
    mapper: Arc<dyn TypeMapper>,
    splitter: Arc<dyn Splitter>,
    generator: Arc<dyn ExternalDepsGenerator>,
    settings: Settings,
    report_path: Option<PathBuf>,
}

impl Configuration {
    pub fn new(
        storage: Arc<dyn StorageDriver>,
        cluster: Arc<dyn ClusterClient>,
        mapper: Arc<dyn TypeMapper>,
    ) -> Self {
        let settings = Settings::default();
        Self {
            storage,
            cluster,
            hooks: Arc::new(NoopHookRunner),
            mapper,
            splitter: splitter_for(settings.splitter),
            generator: Arc::new(NoExternalDepsGenerator),
            settings,
            report_path: None,
        }
    }

    /// Configuration with a file store and splitter taken from `settings`
    pub fn from_settings(
        settings: Settings,
        cluster: Arc<dyn ClusterClient>,
        mapper: Arc<dyn TypeMapper>,
    ) -> Result<Self> {
        let storage = Arc::new(FileDriver::from_settings(&settings)?);
        Ok(Self::new(storage, cluster, mapper).with_settings(settings))
    }

    pub fn with_hook_runner(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn Splitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ExternalDepsGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Replace the settings; the splitter follows `settings.splitter`
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.splitter = splitter_for(settings.splitter);
        self.settings = settings;
        self
    }

    /// Write a [`DeployReport`] to `path` after every install, upgrade and rollback
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn storage(&self) -> &dyn StorageDriver {
        self.storage.as_ref()
    }

    pub fn cluster(&self) -> &dyn ClusterClient {
        self.cluster.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// History of a release, empty when it was never installed
    async fn history_or_empty(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        match self.storage.history(namespace, name).await {
            Ok(history) => Ok(history),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Split `target` into stages and resolve their external dependencies
    fn plan(&self, target: Release, diagnostics: &mut Diagnostics) -> Result<RolloutPhase> {
        let mut phase = RolloutPhase::new(target, Arc::clone(&self.splitter));
        phase.parse_stages_from_manifest(self.cluster.as_ref())?;
        phase.generate_stages_external_deps(
            self.generator.as_ref(),
            self.mapper.as_ref(),
            diagnostics,
        )?;
        debug!(
            release = %phase.release().name,
            stages = %phase.stages().summary(),
            "planned rollout"
        );
        Ok(phase)
    }

    /// Roll out a target revision that is already stored as pending
    ///
    /// `current` is only given for rollbacks, where a failure supersedes it.
    async fn deploy(
        &self,
        operation: Operation,
        phase: RolloutPhase,
        mut current: Option<Release>,
        params: &DeployParams,
        diagnostics: Diagnostics,
    ) -> Result<ActionOutcome> {
        let name = phase.release().name.clone();
        let namespace = phase.release().namespace.clone();
        let version = phase.release().version;
        info!(release = %name, version, operation = operation.as_str(), "deploying");

        let mut manager = RolloutPhaseManager::new(
            phase,
            Arc::clone(&self.storage),
            Arc::clone(&self.cluster),
        )
        .with_delete_timeout(params.timeout);
        let mut hooks = Vec::new();

        let pre_hooks = self
            .run_hooks(
                manager.phase_mut().release_mut(),
                operation.pre_event(),
                params,
                &mut hooks,
            )
            .await;
        if let Err(error) = pre_hooks {
            return Err(self.fail(operation, manager, current.as_mut(), error, params).await);
        }

        let prepared = match self
            .storage
            .history_until_revision(&namespace, &name, version)
            .await
        {
            Ok(history) => manager.add_calculated_previously_deployed_resources(history),
            Err(error) => Err(error),
        };
        if let Err(error) = prepared {
            return Err(self.fail(operation, manager, current.as_mut(), error, params).await);
        }

        let handler = DeployStageHandler::new(self.cluster.as_ref(), &name, &namespace, params);
        let staged = manager.do_stage(&handler).await;
        if let Err(error) = staged {
            return Err(self.fail(operation, manager, current.as_mut(), error, params).await);
        }

        let mut warnings = Vec::new();
        if let Err(error) = manager.delete_orphaned_resources().await {
            warn!(
                release = %name,
                %error,
                "failure removing resources no longer present in the release"
            );
            warnings.push(error.to_string());
        }

        let (mut target, stages) = manager.into_phase().into_parts();
        if let Err(error) = self
            .run_hooks(&mut target, operation.post_event(), params, &mut hooks)
            .await
        {
            warn!(release = %name, %error, "post hooks failed");
            warnings.push(error.to_string());
        }

        if let Err(error) = self.supersede_deployed(&target).await {
            warn!(release = %name, %error, "unable to supersede previous revisions");
            warnings.push(error.to_string());
        }
        let description = match (&params.description, operation) {
            (Some(description), _) => description.clone(),
            (None, Operation::Rollback) => target.info.description.clone(),
            (None, _) => format!("{} complete", operation.title()),
        };
        target.mark_deployed(description);
        self.storage.update(&target).await?;
        info!(release = %name, version, "deployed");

        if params.max_history > 0 {
            let pruned =
                prune_history(self.storage.as_ref(), &namespace, &name, params.max_history).await;
            match pruned {
                Ok(pruned) if !pruned.is_empty() => {
                    debug!(release = %name, ?pruned, "pruned old revisions");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(release = %name, %error, "unable to prune release history");
                    warnings.push(error.to_string());
                }
            }
        }

        self.write_report(&target);
        Ok(ActionOutcome {
            release: target,
            stages,
            diagnostics,
            hooks,
            warnings,
        })
    }

    async fn run_hooks(
        &self,
        release: &mut Release,
        event: HookEvent,
        params: &DeployParams,
        results: &mut Vec<HookResult>,
    ) -> Result<()> {
        if params.no_hooks {
            debug!(release = %release.name, %event, "hooks disabled");
            return Ok(());
        }
        let mut executor =
            HookExecutor::new(self.hooks.as_ref(), self.storage.as_ref(), params.timeout);
        let outcome = executor.execute(release, event).await;
        results.append(&mut executor.results);
        outcome
    }

    /// Record the failure, optionally clean up the failing stage and report
    async fn fail(
        &self,
        operation: Operation,
        mut manager: RolloutPhaseManager,
        current: Option<&mut Release>,
        error: KubeError,
        params: &DeployParams,
    ) -> KubeError {
        self.record_failed(operation, manager.phase_mut().release_mut(), current, &error)
            .await;
        self.write_report(manager.release());

        if !params.cleanup_on_fail {
            return error;
        }
        match self
            .cleanup_failed_stage(operation, &manager, &error, params)
            .await
        {
            Ok(()) => error,
            Err(cleanup_error) => cleanup_error,
        }
    }

    /// Mark `target` Failed and, on rollback, `current` Superseded
    ///
    /// Store errors are logged only; the original error is what the caller
    /// reports.
    async fn record_failed(
        &self,
        operation: Operation,
        target: &mut Release,
        current: Option<&mut Release>,
        error: &KubeError,
    ) {
        let message = match error.stage_index() {
            Some(stage) => format!(
                "{} {:?} failed in stage {}: {}",
                operation.title(),
                target.name,
                stage,
                error
            ),
            None => format!("{} {:?} failed: {}", operation.title(), target.name, error),
        };
        warn!("{}", message);
        target.mark_failed(message);

        if let Some(current) = current {
            current.mark_superseded();
            self.record_release(current).await;
        }
        self.record_release(target).await;
    }

    async fn record_release(&self, release: &Release) {
        if let Err(error) = self.storage.update(release).await {
            warn!(
                release = %release.name,
                version = release.version,
                %error,
                "failed to store release"
            );
        }
    }

    /// Delete what the failing stage created in this run
    async fn cleanup_failed_stage(
        &self,
        operation: Operation,
        manager: &RolloutPhaseManager,
        error: &KubeError,
        params: &DeployParams,
    ) -> Result<()> {
        let created = error
            .stage_index()
            .and_then(|index| manager.phase().stages().get(index))
            .and_then(|stage| stage.result.as_ref())
            .map(|result| result.created.clone())
            .unwrap_or_default();
        if created.is_empty() {
            return Ok(());
        }

        info!(count = created.len(), "cleanup on fail set, cleaning up resources");
        let release = manager.release();
        let options = DeleteOptions {
            wait: params.wait,
            wait_timeout: Some(params.timeout),
            skip_if_invalid_ownership: true,
            ..DeleteOptions::for_release(&release.name, &release.namespace)
        };
        let (_, errors) = self.cluster.delete(&created, &options).await;
        if !errors.is_empty() {
            return Err(KubeError::CleanupFailed {
                operation: operation.as_str().to_string(),
                original: error.to_string(),
                message: join_errors(&errors, ", "),
            });
        }

        info!("resource cleanup complete");
        Ok(())
    }

    /// Mark every other Deployed revision of `release` as Superseded
    ///
    /// Returns the superseded versions.
    pub async fn supersede_deployed(&self, release: &Release) -> Result<Vec<u32>> {
        let deployed = self
            .storage
            .deployed_all(&release.namespace, &release.name)
            .await?;

        let mut superseded = Vec::new();
        for mut previous in deployed {
            if previous.version == release.version {
                continue;
            }
            info!(
                release = %release.name,
                version = previous.version,
                "superseding previous deployment"
            );
            previous.mark_superseded();
            self.record_release(&previous).await;
            superseded.push(previous.version);
        }
        Ok(superseded)
    }

    fn write_report(&self, release: &Release) {
        let Some(path) = &self.report_path else {
            return;
        };
        if let Err(error) = DeployReport::from_release(release).write_to(path) {
            warn!(path = %path.display(), %error, "error writing deploy report file");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::cluster::{ClusterCall, MockClusterClient};
    use crate::mapping::StaticTypeMapper;
    use crate::resource::testing::{cm, list};
    use crate::storage::MockStorageDriver;
    use bosun_core::ReleaseStatus;

    fn params() -> DeployParams {
        DeployParams::from_settings(&Settings::default())
    }

    #[tokio::test]
    async fn test_handler_creates_when_nothing_deployed() {
        let h = Harness::new();
        let p = params();
        let handler = DeployStageHandler::new(&h.cluster, "demo", "default", &p);
        let mut stage = Stage::new(0, list(vec![cm("a")]));

        handler
            .apply(0, &mut stage, &ResourceList::new())
            .await
            .unwrap();

        assert_eq!(
            h.cluster.calls(),
            vec![ClusterCall::Create(vec!["default:ConfigMap/a".to_string()])]
        );
        assert_eq!(stage.result.unwrap().created.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_updates_and_recreates_pods() {
        let h = Harness::new();
        h.cluster.seed(&list(vec![cm("a")]));
        let p = DeployParams {
            force: true,
            recreate_pods: true,
            ..params()
        };
        let handler = DeployStageHandler::new(&h.cluster, "demo", "default", &p);
        let mut stage = Stage::new(0, list(vec![cm("a"), cm("b")]));

        handler
            .apply(0, &mut stage, &list(vec![cm("a")]))
            .await
            .unwrap();

        let calls = h.cluster.calls();
        assert!(matches!(&calls[0], ClusterCall::Update { force: true, .. }));
        assert_eq!(
            calls[1],
            ClusterCall::RecreatePods(vec!["default:ConfigMap/a".to_string()])
        );
        let result = stage.result.unwrap();
        assert_eq!(result.created.names(), vec!["default:ConfigMap/b"]);
        assert_eq!(result.updated.names(), vec!["default:ConfigMap/a"]);
    }

    #[tokio::test]
    async fn test_handler_adopts_resources_it_owns() {
        let h = Harness::new();
        let mut kept = cm("kept");
        kept.set_release_metadata("demo", "default");
        h.cluster.seed(&list(vec![kept]));
        let p = params();
        let handler = DeployStageHandler::new(&h.cluster, "demo", "default", &p);
        let mut desired = list(vec![cm("kept"), cm("new")]);
        desired.set_release_metadata("demo", "default");
        let mut stage = Stage::new(0, desired);

        handler
            .apply(0, &mut stage, &ResourceList::new())
            .await
            .unwrap();

        let kept_name = vec!["default:ConfigMap/kept".to_string()];
        assert!(matches!(
            &h.cluster.calls()[0],
            ClusterCall::Update { current, .. } if current == &kept_name
        ));
        let result = stage.result.unwrap();
        assert_eq!(result.updated.names(), vec!["default:ConfigMap/kept"]);
        assert_eq!(result.created.names(), vec!["default:ConfigMap/new"]);
    }

    #[tokio::test]
    async fn test_handler_rejects_existing_resources_it_does_not_own() {
        let h = Harness::new();
        let mut foreign = cm("foreign");
        foreign.set_release_metadata("other", "default");
        h.cluster.seed(&list(vec![foreign, cm("unowned")]));
        let p = params();
        let handler = DeployStageHandler::new(&h.cluster, "demo", "default", &p);

        let mut stage = Stage::new(0, list(vec![cm("foreign")]));
        let err = handler
            .apply(0, &mut stage, &ResourceList::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource default:ConfigMap/foreign is owned by release 'default/other'"
        );

        let mut stage = Stage::new(0, list(vec![cm("unowned")]));
        let err = handler
            .apply(0, &mut stage, &ResourceList::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ExistingResourceConflict { .. }));
        assert!(h.cluster.calls().is_empty());
        assert!(stage.result.is_none());
    }

    #[tokio::test]
    async fn test_handler_keeps_partial_result() {
        let h = Harness::new();
        h.cluster.fail_apply_of("default:ConfigMap/b");
        let p = params();
        let handler = DeployStageHandler::new(&h.cluster, "demo", "default", &p);
        let mut stage = Stage::new(0, list(vec![cm("a"), cm("b")]));

        let err = handler
            .apply(0, &mut stage, &ResourceList::new())
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::ResourceFailed { .. }));
        assert_eq!(
            stage.result.unwrap().created.names(),
            vec!["default:ConfigMap/a"]
        );
    }

    #[tokio::test]
    async fn test_handler_waits_only_when_asked() {
        let h = Harness::new();
        let stage = Stage::new(0, list(vec![cm("a")]));

        let no_wait = params();
        DeployStageHandler::new(&h.cluster, "demo", "default", &no_wait)
            .track(0, &stage)
            .await
            .unwrap();
        assert!(h.cluster.calls().is_empty());

        let jobs = DeployParams {
            wait: true,
            wait_for_jobs: true,
            ..params()
        };
        DeployStageHandler::new(&h.cluster, "demo", "default", &jobs)
            .track(0, &stage)
            .await
            .unwrap();
        assert_eq!(
            h.cluster.calls(),
            vec![ClusterCall::WaitWithJobs(vec!["default:ConfigMap/a".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_supersede_deployed() {
        let h = Harness::new();
        for version in 1..=3 {
            let mut r = Release::for_install("demo", "default", String::new());
            r.version = version;
            r.mark_deployed("done");
            h.storage.create(&r).await.unwrap();
        }
        let latest = h.storage.get("default", "demo", 3).await.unwrap();

        let superseded = h.config.supersede_deployed(&latest).await.unwrap();

        assert_eq!(superseded, vec![1, 2]);
        let history = h.storage.history("default", "demo").await.unwrap();
        let statuses: Vec<_> = history.iter().map(|r| r.info.status).collect();
        assert_eq!(
            statuses,
            vec![
                ReleaseStatus::Superseded,
                ReleaseStatus::Superseded,
                ReleaseStatus::Deployed
            ]
        );
    }

    /// Storage whose Deployed lookup always fails
    struct FailingDeployedLookup(MockStorageDriver);

    #[async_trait]
    impl StorageDriver for FailingDeployedLookup {
        async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
            self.0.get(namespace, name, version).await
        }

        async fn get_latest(&self, namespace: &str, name: &str) -> Result<Release> {
            self.0.get_latest(namespace, name).await
        }

        async fn list(
            &self,
            namespace: Option<&str>,
            name: Option<&str>,
            include_superseded: bool,
        ) -> Result<Vec<Release>> {
            self.0.list(namespace, name, include_superseded).await
        }

        async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
            self.0.history(namespace, name).await
        }

        async fn create(&self, release: &Release) -> Result<()> {
            self.0.create(release).await
        }

        async fn update(&self, release: &Release) -> Result<()> {
            self.0.update(release).await
        }

        async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
            self.0.delete(namespace, name, version).await
        }

        async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
            self.0.delete_all(namespace, name).await
        }

        async fn deployed_all(&self, _namespace: &str, _name: &str) -> Result<Vec<Release>> {
            Err(KubeError::Storage("listing deployed revisions failed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_supersede_failure_still_marks_deployed() {
        let storage = MockStorageDriver::new();
        let cluster = MockClusterClient::new();
        let config = Configuration::new(
            Arc::new(FailingDeployedLookup(storage.clone())),
            Arc::new(cluster.clone()),
            Arc::new(StaticTypeMapper::new()),
        );
        let content = ReleaseContent::new(super::testing::configmaps(&["a"]));

        let outcome = config
            .install(&InstallOptions::new("demo", "default"), content)
            .await
            .unwrap();

        assert_eq!(outcome.release.info.status, ReleaseStatus::Deployed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("listing deployed revisions failed"));
        let stored = storage.get("default", "demo", 1).await.unwrap();
        assert_eq!(stored.info.status, ReleaseStatus::Deployed);
        assert_eq!(cluster.live_names(), vec!["default:ConfigMap/a"]);
    }

    #[test]
    fn test_release_content_builder() {
        let content = ReleaseContent::new("kind: ConfigMap").with_notes("hello");
        assert_eq!(content.manifest, "kind: ConfigMap");
        assert_eq!(content.notes.as_deref(), Some("hello"));
        assert!(content.hooks.is_empty());
    }
}
