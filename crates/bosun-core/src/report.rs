//! Machine-readable summary of how a release operation ended

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::phase::Phase;
use crate::release::{Release, ReleaseStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployReport {
    pub release: String,
    pub namespace: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<usize>,
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
}

impl DeployReport {
    pub fn from_release(release: &Release) -> Self {
        Self {
            release: release.name.clone(),
            namespace: release.namespace.clone(),
            revision: release.version,
            status: release.info.status,
            last_phase: release.info.last_phase,
            last_stage: release.info.last_stage,
            first_deployed: release.info.first_deployed,
            last_deployed: release.info.last_deployed,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_from_release() {
        let mut release = Release::for_install("demo", "web", String::new());
        release.set_rollout_phase(1);
        release.mark_deployed("Install complete");

        let report = DeployReport::from_release(&release);
        assert_eq!(report.release, "demo");
        assert_eq!(report.revision, 1);
        assert_eq!(report.status, ReleaseStatus::Deployed);
        assert_eq!(report.last_phase, Some(Phase::Rollout));
        assert_eq!(report.last_stage, Some(1));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"deployed\""));
        assert!(json.contains("\"last_phase\": \"rollout\""));
    }

    #[test]
    fn test_report_omits_unset_checkpoint() {
        let mut release = Release::for_install("demo", "web", String::new());
        release.set_uninstall_phase();

        let json = DeployReport::from_release(&release).to_json().unwrap();
        assert!(json.contains("\"last_phase\": \"uninstall\""));
        assert!(!json.contains("last_stage"));
    }

    #[test]
    fn test_report_write_to() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("reports").join("demo.json");
        let release = Release::for_install("demo", "web", String::new());

        DeployReport::from_release(&release).write_to(&path).unwrap();

        let back: DeployReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.release, "demo");
        assert_eq!(back.status, ReleaseStatus::PendingInstall);
    }
}
