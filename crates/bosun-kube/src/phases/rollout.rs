//! Rollout phase of one release revision
//!
//! Progress is read exclusively from the release's persisted checkpoint
//! (`last_phase` / `last_stage`), never from the cluster.

use std::sync::Arc;

use bosun_core::{Diagnostics, Phase, Release};

use super::generator::ExternalDepsGenerator;
use super::splitter::Splitter;
use crate::cluster::ClusterClient;
use crate::error::{KubeError, Result};
use crate::mapping::TypeMapper;
use crate::resource::ResourceList;
use crate::stages::SortedStageList;

pub struct RolloutPhase {
    release: Release,
    splitter: Arc<dyn Splitter>,
    stages: SortedStageList,
}

impl RolloutPhase {
    pub fn new(release: Release, splitter: Arc<dyn Splitter>) -> Self {
        Self {
            release,
            splitter,
            stages: SortedStageList::default(),
        }
    }

    pub fn release(&self) -> &Release {
        &self.release
    }

    pub fn release_mut(&mut self) -> &mut Release {
        &mut self.release
    }

    pub fn into_release(self) -> Release {
        self.release
    }

    /// Release and stages, consuming the phase
    pub fn into_parts(self) -> (Release, SortedStageList) {
        (self.release, self.stages)
    }

    pub fn splitter(&self) -> Arc<dyn Splitter> {
        Arc::clone(&self.splitter)
    }

    pub fn stages(&self) -> &SortedStageList {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut SortedStageList {
        &mut self.stages
    }

    /// Build the release manifest into resources and split them
    pub fn parse_stages_from_manifest(&mut self, cluster: &dyn ClusterClient) -> Result<()> {
        let resources = cluster.build(&self.release.manifest, &self.release.namespace)?;
        self.parse_stages(resources)
    }

    /// Split resources into stages, stamping release ownership on each
    pub fn parse_stages(&mut self, mut resources: ResourceList) -> Result<()> {
        resources.set_release_metadata(&self.release.name, &self.release.namespace);
        self.stages = self
            .splitter
            .split(resources)
            .map_err(|e| KubeError::StageSplit(Box::new(e)))?;
        Ok(())
    }

    /// Attach external dependencies and reject any that point back into the release
    pub fn generate_stages_external_deps(
        &mut self,
        generator: &dyn ExternalDepsGenerator,
        mapper: &dyn TypeMapper,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        generator.generate(&mut self.stages, &self.release.namespace, mapper, diagnostics)?;

        let own = self.all_resources();
        for stage in self.stages.iter() {
            for dependency in stage.external_dependencies.iter() {
                if let Some(info) = dependency.info().filter(|info| own.contains(info)) {
                    return Err(KubeError::SelfDependency {
                        resource: info.to_string(),
                        dependency: dependency.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Whether the rollout of this revision ever began
    ///
    /// An unset phase is a record written before checkpoints existed and
    /// counts as fully rolled out.
    pub fn is_phase_started(&self) -> bool {
        matches!(
            self.release.info.last_phase,
            None | Some(Phase::Rollout | Phase::Uninstall | Phase::HooksPost)
        )
    }

    pub fn is_phase_completed(&self) -> bool {
        match self.release.info.last_phase {
            None | Some(Phase::HooksPost) => true,
            Some(Phase::Rollout) => match self.release.info.last_stage {
                None => true,
                Some(stage) => Some(stage) == self.stages.last_index(),
            },
            _ => false,
        }
    }

    /// Index of the last stage that reached the cluster
    pub fn last_deployed_stage_index(&self) -> Option<usize> {
        let final_index = self.stages.last_index()?;
        if !self.is_phase_started() {
            return None;
        }
        if self.is_phase_completed() {
            return Some(final_index);
        }
        Some(
            self.release
                .info
                .last_stage
                .unwrap_or(final_index)
                .min(final_index),
        )
    }

    /// Desired resources of stages `0..=last_deployed_stage_index`
    pub fn deployed_resources(&self) -> ResourceList {
        match self.last_deployed_stage_index() {
            Some(last) => self.stages.merged_desired_resources_in_range(0, last),
            None => ResourceList::new(),
        }
    }

    pub fn all_resources(&self) -> ResourceList {
        self.stages.merged_desired_resources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::externaldeps::ExternalDependency;
    use crate::mapping::StaticTypeMapper;
    use crate::phases::generator::NoExternalDepsGenerator;
    use crate::phases::splitter::WeightAnnotationSplitter;
    use crate::stages::Stage;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
  annotations:
    bosun.io/weight: "-1"
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
---
apiVersion: v1
kind: Service
metadata:
  name: web
  annotations:
    bosun.io/weight: "5"
"#;

    fn phase(last_phase: Option<Phase>, last_stage: Option<usize>) -> RolloutPhase {
        let mut release = Release::for_install("demo", "default", MANIFEST.to_string());
        release.info.last_phase = last_phase;
        release.info.last_stage = last_stage;
        let mut phase = RolloutPhase::new(release, Arc::new(WeightAnnotationSplitter));
        phase
            .parse_stages_from_manifest(&MockClusterClient::new())
            .unwrap();
        phase
    }

    #[test]
    fn test_parse_stages_from_manifest() {
        let p = phase(None, None);
        assert_eq!(p.stages().len(), 3);
        assert_eq!(
            p.all_resources().names(),
            vec![
                "default:ConfigMap/first",
                "default:Deployment/web",
                "default:Service/web"
            ]
        );
        let first = p.all_resources().iter().next().cloned().unwrap();
        assert_eq!(first.owner_release().map(|(name, _)| name), Some("demo"));
    }

    #[test]
    fn test_parse_stages_wraps_split_failure() {
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n  \
                        annotations:\n    bosun.io/weight: heavy\n";
        let release = Release::for_install("demo", "default", manifest.to_string());
        let mut p = RolloutPhase::new(release, Arc::new(WeightAnnotationSplitter));
        let err = p
            .parse_stages_from_manifest(&MockClusterClient::new())
            .unwrap_err();
        assert!(matches!(err, KubeError::StageSplit(_)));
    }

    #[test]
    fn test_legacy_unset_phase_counts_as_complete() {
        let p = phase(None, None);
        assert!(p.is_phase_started());
        assert!(p.is_phase_completed());
        assert_eq!(p.last_deployed_stage_index(), Some(2));
        assert_eq!(p.deployed_resources().len(), 3);
    }

    #[test]
    fn test_not_started_phases() {
        for last_phase in [Phase::Init, Phase::HooksPre] {
            let p = phase(Some(last_phase), Some(1));
            assert!(!p.is_phase_started());
            assert!(!p.is_phase_completed());
            assert_eq!(p.last_deployed_stage_index(), None);
            assert!(p.deployed_resources().is_empty());
        }
    }

    #[test]
    fn test_rollout_checkpoint_index() {
        let p = phase(Some(Phase::Rollout), Some(1));
        assert!(p.is_phase_started());
        assert!(!p.is_phase_completed());
        assert_eq!(p.last_deployed_stage_index(), Some(1));
        assert_eq!(
            p.deployed_resources().names(),
            vec!["default:ConfigMap/first", "default:Deployment/web"]
        );

        let done = phase(Some(Phase::Rollout), Some(2));
        assert!(done.is_phase_completed());
        assert_eq!(done.last_deployed_stage_index(), Some(2));

        let unset_stage = phase(Some(Phase::Rollout), None);
        assert!(unset_stage.is_phase_completed());
    }

    #[test]
    fn test_uninstall_and_hooks_post() {
        let uninstall = phase(Some(Phase::Uninstall), None);
        assert!(uninstall.is_phase_started());
        assert!(!uninstall.is_phase_completed());
        assert_eq!(uninstall.last_deployed_stage_index(), Some(2));

        let clamped = phase(Some(Phase::Uninstall), Some(7));
        assert_eq!(clamped.last_deployed_stage_index(), Some(2));

        let post = phase(Some(Phase::HooksPost), Some(0));
        assert!(post.is_phase_completed());
        assert_eq!(post.last_deployed_stage_index(), Some(2));
    }

    #[test]
    fn test_no_stages_has_no_index() {
        let release = Release::for_install("demo", "default", String::new());
        let p = RolloutPhase::new(release, Arc::new(WeightAnnotationSplitter));
        assert_eq!(p.last_deployed_stage_index(), None);
        assert!(p.deployed_resources().is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut p = phase(None, None);
        let mapper = StaticTypeMapper::new();
        let mut dep = ExternalDependency::new("loop", "deploy", "web").with_namespace("default");
        dep.generate_info(&mapper).unwrap();
        p.stages_mut().get_mut(2).unwrap().external_dependencies.push(dep);

        let err = p
            .generate_stages_external_deps(
                &NoExternalDepsGenerator,
                &mapper,
                &mut Diagnostics::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            KubeError::SelfDependency { ref dependency, .. } if dependency == "loop"
        ));
    }

    #[test]
    fn test_foreign_dependency_accepted() {
        let release = Release::for_install("demo", "default", String::new());
        let mut p = RolloutPhase::new(release, Arc::new(WeightAnnotationSplitter));
        p.parse_stages(ResourceList::new()).unwrap();

        let mapper = StaticTypeMapper::new();
        let mut dep = ExternalDependency::new("db", "sts", "postgres").with_namespace("data");
        dep.generate_info(&mapper).unwrap();
        *p.stages_mut() = SortedStageList::new(vec![Stage::new(0, ResourceList::new())]);
        p.stages_mut().get_mut(0).unwrap().external_dependencies.push(dep);

        p.generate_stages_external_deps(&NoExternalDepsGenerator, &mapper, &mut Diagnostics::new())
            .unwrap();
    }
}
