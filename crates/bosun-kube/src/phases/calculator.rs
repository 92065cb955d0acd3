//! Reconstruction of what is live from release history alone

use std::sync::Arc;

use bosun_core::{Release, ReleaseStatus};
use tracing::debug;

use super::rollout::RolloutPhase;
use super::splitter::Splitter;
use crate::cluster::ClusterClient;
use crate::error::{KubeError, Result};
use crate::resource::ResourceList;

/// Resources that earlier revisions of a release put on the cluster
///
/// Scanning starts at the most recent point the cluster state is known
/// (the last fully deployed revision or right after the last uninstall), then
/// each later revision contributes the stages its checkpoint says it reached.
pub struct DeployedResourcesCalculator<'a> {
    history: Vec<Release>,
    cluster: &'a dyn ClusterClient,
    splitter: Arc<dyn Splitter>,
}

impl<'a> DeployedResourcesCalculator<'a> {
    pub fn new(
        mut history: Vec<Release>,
        cluster: &'a dyn ClusterClient,
        splitter: Arc<dyn Splitter>,
    ) -> Self {
        history.sort_by_key(|r| r.version);
        Self {
            history,
            cluster,
            splitter,
        }
    }

    /// Index of the first revision to scan, `None` when nothing is live
    fn scan_start(&self) -> Option<usize> {
        let newest = self.history.len().checked_sub(1)?;
        let last_deployed = self.history.iter().rposition(|r| {
            matches!(
                r.info.status,
                ReleaseStatus::Deployed | ReleaseStatus::Superseded
            )
        });
        let last_uninstalled = self
            .history
            .iter()
            .rposition(|r| r.info.status == ReleaseStatus::Uninstalled);

        match (last_deployed, last_uninstalled) {
            (None, None) => Some(0),
            (Some(deployed), None) => Some(deployed),
            (_, Some(uninstalled)) if uninstalled == newest => None,
            (None, Some(uninstalled)) => Some(uninstalled + 1),
            (Some(deployed), Some(uninstalled)) => Some(deployed.max(uninstalled + 1)),
        }
    }

    pub fn calculate(&self) -> Result<ResourceList> {
        let mut deployed = ResourceList::new();
        let Some(start) = self.scan_start() else {
            return Ok(deployed);
        };

        for release in &self.history[start..] {
            match release.info.status {
                ReleaseStatus::Deployed
                | ReleaseStatus::Superseded
                | ReleaseStatus::Failed
                | ReleaseStatus::PendingInstall
                | ReleaseStatus::PendingUpgrade
                | ReleaseStatus::PendingRollback
                | ReleaseStatus::Uninstalling => {
                    let mut phase = RolloutPhase::new(release.clone(), Arc::clone(&self.splitter));
                    phase.parse_stages_from_manifest(self.cluster)?;
                    let resources = phase.deployed_resources();
                    debug!(
                        version = release.version,
                        status = %release.info.status,
                        count = resources.len(),
                        "previously deployed resources"
                    );
                    deployed.merge(resources);
                }
                ReleaseStatus::Uninstalled | ReleaseStatus::Unknown => {}
                status => {
                    return Err(KubeError::UnexpectedStatus {
                        version: release.version,
                        status: status.to_string(),
                    });
                }
            }
        }

        Ok(deployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::phases::splitter::SingleStageSplitter;
    use bosun_core::Phase;

    fn manifest(names: &[&str]) -> String {
        names
            .iter()
            .map(|n| format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n", n))
            .collect::<Vec<_>>()
            .join("---\n")
    }

    fn release(version: u32, status: ReleaseStatus, names: &[&str]) -> Release {
        let mut r = Release::for_install("demo", "default", manifest(names));
        r.version = version;
        r.info.status = status;
        r.info.last_phase = Some(Phase::HooksPost);
        r
    }

    fn calculate(history: Vec<Release>) -> Vec<String> {
        let cluster = MockClusterClient::new();
        DeployedResourcesCalculator::new(history, &cluster, Arc::new(SingleStageSplitter))
            .calculate()
            .unwrap()
            .names()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items
            .iter()
            .map(|n| format!("default:ConfigMap/{}", n))
            .collect()
    }

    #[test]
    fn test_empty_history() {
        assert!(calculate(vec![]).is_empty());
    }

    #[test]
    fn test_neither_deployed_nor_uninstalled_scans_all() {
        let history = vec![
            release(1, ReleaseStatus::Failed, &["a"]),
            release(2, ReleaseStatus::Failed, &["b"]),
        ];
        assert_eq!(calculate(history), names(&["a", "b"]));
    }

    #[test]
    fn test_starts_at_last_deployed() {
        let history = vec![
            release(3, ReleaseStatus::Failed, &["c"]),
            release(1, ReleaseStatus::Superseded, &["a"]),
            release(2, ReleaseStatus::Deployed, &["b"]),
        ];
        assert_eq!(calculate(history), names(&["b", "c"]));
    }

    #[test]
    fn test_uninstalled_newest_yields_nothing() {
        let history = vec![
            release(1, ReleaseStatus::Superseded, &["a"]),
            release(2, ReleaseStatus::Uninstalled, &["b"]),
        ];
        assert!(calculate(history).is_empty());

        let only_uninstalled = vec![release(1, ReleaseStatus::Uninstalled, &["a"])];
        assert!(calculate(only_uninstalled).is_empty());
    }

    #[test]
    fn test_starts_after_uninstall() {
        let history = vec![
            release(1, ReleaseStatus::Uninstalled, &["a"]),
            release(2, ReleaseStatus::Failed, &["b"]),
        ];
        assert_eq!(calculate(history), names(&["b"]));

        let both = vec![
            release(1, ReleaseStatus::Superseded, &["a"]),
            release(2, ReleaseStatus::Uninstalled, &["b"]),
            release(3, ReleaseStatus::PendingInstall, &["c"]),
        ];
        assert_eq!(calculate(both), names(&["c"]));

        let redeployed = vec![
            release(1, ReleaseStatus::Uninstalled, &["a"]),
            release(2, ReleaseStatus::Superseded, &["b"]),
            release(3, ReleaseStatus::Deployed, &["c"]),
        ];
        assert_eq!(calculate(redeployed), names(&["c"]));
    }

    #[test]
    fn test_partial_rollout_contributes_reached_stages() {
        let mut pending = release(2, ReleaseStatus::PendingUpgrade, &["b"]);
        pending.info.last_phase = Some(Phase::HooksPre);
        let history = vec![release(1, ReleaseStatus::Deployed, &["a"]), pending];
        assert_eq!(calculate(history), names(&["a"]));
    }

    #[test]
    fn test_contribution_of_each_status_after_scan_start() {
        use ReleaseStatus::*;
        let cases = [
            (Deployed, Phase::HooksPost, names(&["b"])),
            (Superseded, Phase::HooksPost, names(&["b"])),
            (Failed, Phase::Rollout, names(&["a", "b"])),
            (PendingInstall, Phase::Rollout, names(&["a", "b"])),
            (PendingUpgrade, Phase::Rollout, names(&["a", "b"])),
            (PendingRollback, Phase::Rollout, names(&["a", "b"])),
            (PendingRollback, Phase::HooksPre, names(&["a"])),
            (Uninstalling, Phase::Uninstall, names(&["a", "b"])),
            (Uninstalling, Phase::HooksPre, names(&["a"])),
            (Unknown, Phase::HooksPost, names(&["a"])),
            (Uninstalled, Phase::HooksPost, vec![]),
        ];

        for (status, phase, expected) in cases {
            let mut later = release(2, status, &["b"]);
            later.info.last_phase = Some(phase);
            later.info.last_stage = Some(0);
            let history = vec![release(1, Deployed, &["a"]), later];
            assert_eq!(calculate(history), expected, "{:?} at {:?}", status, phase);
        }
    }

    #[test]
    fn test_later_revisions_replace_duplicates() {
        let history = vec![
            release(1, ReleaseStatus::Deployed, &["a", "b"]),
            release(2, ReleaseStatus::Failed, &["b", "c"]),
        ];
        assert_eq!(calculate(history), names(&["a", "b", "c"]));
    }
}
