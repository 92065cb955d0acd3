//! Stage-by-stage driver of a rollout

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bosun_core::Release;
use tracing::{debug, info, warn};

use super::calculator::DeployedResourcesCalculator;
use super::rollout::RolloutPhase;
use crate::cluster::{ClusterClient, DeleteOptions, OperationResult};
use crate::error::{KubeError, Result, join_errors};
use crate::resource::ResourceList;
use crate::stages::Stage;
use crate::storage::StorageDriver;

/// Callbacks run for every stage by [`RolloutPhaseManager::do_stage`]
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Wait for the stage's external dependencies
    async fn track_external_deps(&self, index: usize, stage: &Stage) -> Result<()>;

    /// Apply the stage and record its outcome in `stage.result`
    ///
    /// `previously_deployed` holds the stage's resources that already exist.
    /// A failed apply still records what it managed to create.
    async fn apply(
        &self,
        index: usize,
        stage: &mut Stage,
        previously_deployed: &ResourceList,
    ) -> Result<()>;

    /// Wait for the applied stage to become ready
    async fn track(&self, index: usize, stage: &Stage) -> Result<()>;
}

pub struct RolloutPhaseManager {
    phase: RolloutPhase,
    storage: Arc<dyn StorageDriver>,
    cluster: Arc<dyn ClusterClient>,
    previously_deployed: ResourceList,
    delete_timeout: Duration,
}

impl RolloutPhaseManager {
    pub fn new(
        phase: RolloutPhase,
        storage: Arc<dyn StorageDriver>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            phase,
            storage,
            cluster,
            previously_deployed: ResourceList::new(),
            delete_timeout: Duration::from_secs(300),
        }
    }

    /// Timeout for waiting on orphan deletion
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    pub fn phase(&self) -> &RolloutPhase {
        &self.phase
    }

    pub fn phase_mut(&mut self) -> &mut RolloutPhase {
        &mut self.phase
    }

    pub fn release(&self) -> &Release {
        self.phase.release()
    }

    pub fn into_phase(self) -> RolloutPhase {
        self.phase
    }

    pub fn previously_deployed(&self) -> &ResourceList {
        &self.previously_deployed
    }

    /// Merge in what `history` says is live
    pub fn add_calculated_previously_deployed_resources(
        &mut self,
        history: Vec<Release>,
    ) -> Result<()> {
        let calculated = DeployedResourcesCalculator::new(
            history,
            self.cluster.as_ref(),
            self.phase.splitter(),
        )
        .calculate()?;
        self.previously_deployed.merge(calculated);
        Ok(())
    }

    /// Merge in an explicitly known set of live resources
    pub fn add_previously_deployed_resources(&mut self, resources: ResourceList) {
        self.previously_deployed.merge(resources);
    }

    /// Run every stage in weight order, stopping at the first failure
    ///
    /// The checkpoint is written after each apply and before tracking, so a
    /// crash during a readiness wait still records the stage as deployed.
    pub async fn do_stage(&mut self, handler: &dyn StageHandler) -> Result<()> {
        for index in 0..self.phase.stages().len() {
            let previously_deployed = match self.phase.stages().get(index) {
                Some(stage) => {
                    handler
                        .track_external_deps(index, stage)
                        .await
                        .map_err(|e| KubeError::ExternalDependencies {
                            stage: index,
                            source: Box::new(e),
                        })?;
                    self.previously_deployed.intersect(&stage.desired_resources)
                }
                None => break,
            };

            if let Some(stage) = self.phase.stages_mut().get_mut(index) {
                debug!(stage = index, weight = stage.weight, "applying stage");
                handler
                    .apply(index, stage, &previously_deployed)
                    .await
                    .map_err(|e| KubeError::StageApply {
                        stage: index,
                        source: Box::new(e),
                    })?;
                if stage.result.is_none() {
                    return Err(KubeError::StageNotApplied { stage: index });
                }
            }

            let release = self.phase.release_mut();
            release.set_rollout_phase(index);
            self.storage.update(release).await?;

            if let Some(stage) = self.phase.stages().get(index) {
                handler
                    .track(index, stage)
                    .await
                    .map_err(|e| KubeError::StageTrack {
                        stage: index,
                        source: Box::new(e),
                    })?;
            }
        }

        Ok(())
    }

    /// Previously deployed resources no stage of this rollout wants any more
    ///
    /// Resources with a keep resource policy are left alone.
    pub fn orphaned_resources(&self) -> ResourceList {
        self.previously_deployed
            .difference(&self.phase.all_resources())
            .filter(|info| !info.has_keep_policy())
    }

    /// Delete orphaned resources and wait for them to go away
    ///
    /// Failures are aggregated into one error; the rollout itself is not
    /// affected by it.
    pub async fn delete_orphaned_resources(&self) -> Result<OperationResult> {
        let orphans = self.orphaned_resources();
        if orphans.is_empty() {
            return Ok(OperationResult::default());
        }

        let release = self.phase.release();
        info!(count = orphans.len(), release = %release.name, "deleting orphaned resources");

        let options = DeleteOptions {
            wait: true,
            wait_timeout: Some(self.delete_timeout),
            skip_if_invalid_ownership: true,
            ..DeleteOptions::for_release(&release.name, &release.namespace)
        };
        let (result, errors) = self.cluster.delete(&orphans, &options).await;

        if errors.is_empty() {
            return Ok(result);
        }
        for error in &errors {
            warn!(%error, "failed to delete orphaned resource");
        }
        Err(KubeError::OrphanCleanup {
            count: errors.len(),
            message: join_errors(&errors, "; "),
        })
    }
}
