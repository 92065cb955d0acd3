//! Release records, their status machine and the persisted rollout checkpoint

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::phase::{HookEvent, Phase};

/// Maximum length of a release name (leaves room for generated suffixes)
pub const MAX_RELEASE_NAME_LEN: usize = 53;

static RELEASE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("release name pattern is valid")
});

/// One revision of a named release
///
/// `(name, version)` is the identity of a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,

    /// Kubernetes namespace
    pub namespace: String,

    /// Revision number (1-indexed, monotonic per name)
    pub version: u32,

    /// Status, timestamps and rollout checkpoint
    pub info: ReleaseInfo,

    /// Rendered manifest (all non-hook resources)
    pub manifest: String,

    /// Hooks shipped with this revision
    #[serde(default)]
    pub hooks: Vec<Hook>,

    /// Custom labels for filtering/querying
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Mutable part of a release record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub status: ReleaseStatus,

    /// Human-readable outcome of the last operation
    #[serde(default)]
    pub description: String,

    pub first_deployed: DateTime<Utc>,

    pub last_deployed: DateTime<Utc>,

    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,

    #[serde(default)]
    pub notes: Option<String>,

    /// Last phase the current operation reached; unset on legacy records
    #[serde(default)]
    pub last_phase: Option<Phase>,

    /// Index inside `last_phase` (stage or hook) that was last persisted
    #[serde(default)]
    pub last_stage: Option<usize>,
}

impl ReleaseInfo {
    fn new(status: ReleaseStatus, first_deployed: DateTime<Utc>) -> Self {
        Self {
            status,
            description: String::new(),
            first_deployed,
            last_deployed: Utc::now(),
            deleted: None,
            notes: None,
            last_phase: None,
            last_stage: None,
        }
    }
}

impl Release {
    /// First revision of a new release, checkpointed at the init phase
    pub fn for_install(
        name: impl Into<String>,
        namespace: impl Into<String>,
        manifest: String,
    ) -> Self {
        let mut release = Self {
            name: name.into(),
            namespace: namespace.into(),
            version: 1,
            info: ReleaseInfo::new(ReleaseStatus::PendingInstall, Utc::now()),
            manifest,
            hooks: Vec::new(),
            labels: HashMap::new(),
        };
        release.info.description = "Initial install underway".to_string();
        release.set_init_phase();
        release
    }

    /// Next revision after `previous`, carrying a newly rendered manifest
    pub fn for_upgrade(previous: &Release, manifest: String) -> Self {
        let mut release = Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            info: ReleaseInfo::new(ReleaseStatus::PendingUpgrade, previous.info.first_deployed),
            manifest,
            hooks: Vec::new(),
            labels: previous.labels.clone(),
        };
        release.info.description = "Preparing upgrade".to_string();
        release.set_init_phase();
        release
    }

    /// New revision on top of `current` that restores the content of `target`
    pub fn for_rollback(current: &Release, target: &Release) -> Self {
        let mut release = Self {
            name: current.name.clone(),
            namespace: current.namespace.clone(),
            version: current.version + 1,
            info: ReleaseInfo::new(ReleaseStatus::PendingRollback, current.info.first_deployed),
            manifest: target.manifest.clone(),
            hooks: target.hooks.clone(),
            labels: target.labels.clone(),
        };
        release.info.notes = target.info.notes.clone();
        // Overridden later only if the rollback fails.
        release.info.description = format!("Rollback to {}", target.version);
        release.set_init_phase();
        release
    }

    /// Storage key for this revision
    pub fn storage_key(&self) -> String {
        format!("sh.bosun.release.v1.{}.v{}", self.name, self.version)
    }

    // ========== Checkpoint ==========

    pub fn set_init_phase(&mut self) {
        self.info.last_phase = Some(Phase::Init);
        self.info.last_stage = Some(0);
    }

    /// Record that hook number `index` of `event` is about to run.
    /// Events outside any phase leave the checkpoint unset.
    pub fn set_hook_phase(&mut self, index: usize, event: HookEvent) {
        self.info.last_phase = Phase::from_hook_event(event);
        self.info.last_stage = Some(index);
    }

    /// Record that rollout stage `stage` has been applied
    pub fn set_rollout_phase(&mut self, stage: usize) {
        self.info.last_phase = Some(Phase::Rollout);
        self.info.last_stage = Some(stage);
    }

    pub fn set_uninstall_phase(&mut self) {
        self.info.last_phase = Some(Phase::Uninstall);
        self.info.last_stage = None;
    }

    // ========== Status transitions ==========

    pub fn mark_deployed(&mut self, description: impl Into<String>) {
        self.info.status = ReleaseStatus::Deployed;
        self.info.description = description.into();
        self.info.last_deployed = Utc::now();
    }

    pub fn mark_failed(&mut self, description: impl Into<String>) {
        self.info.status = ReleaseStatus::Failed;
        self.info.description = description.into();
        self.info.last_deployed = Utc::now();
    }

    pub fn mark_superseded(&mut self) {
        self.info.status = ReleaseStatus::Superseded;
    }

    pub fn mark_uninstalling(&mut self) {
        self.info.status = ReleaseStatus::Uninstalling;
        self.info.deleted = Some(Utc::now());
        self.info.description = "Deletion in progress (or silently failed)".to_string();
    }

    pub fn mark_uninstalled(&mut self, description: impl Into<String>) {
        self.info.status = ReleaseStatus::Uninstalled;
        self.info.description = description.into();
    }

    /// Hooks registered for `event`, in execution order (weight, then name)
    pub fn hooks_for(&self, event: HookEvent) -> Vec<&Hook> {
        let mut hooks: Vec<&Hook> = self
            .hooks
            .iter()
            .filter(|h| h.events.contains(&event))
            .collect();
        hooks.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.name.cmp(&b.name)));
        hooks
    }
}

/// Release status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    /// Check if this is a transitional state of an operation in progress
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback | Self::Uninstalling
        )
    }

    /// Whether `uninstall` may start from this status
    pub fn is_uninstallable(&self) -> bool {
        matches!(self, Self::Deployed | Self::Superseded | Self::Failed)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        };
        write!(f, "{}", s)
    }
}

/// Hook definition carried by a release
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub name: String,

    /// Kind of the hook resource
    pub kind: String,

    /// Template path the hook was rendered from
    #[serde(default)]
    pub path: String,

    /// Rendered hook resource
    pub manifest: String,

    /// Events that trigger the hook
    pub events: Vec<HookEvent>,

    /// Lower weights run first
    #[serde(default)]
    pub weight: i32,
}

/// Validate a release name
///
/// Names must be lowercase DNS-1123 subdomains no longer than
/// [`MAX_RELEASE_NAME_LEN`] characters.
pub fn validate_release_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidReleaseName {
            name: name.to_string(),
            reason: "name is empty".to_string(),
        });
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(CoreError::InvalidReleaseName {
            name: name.to_string(),
            reason: format!("longer than {} characters", MAX_RELEASE_NAME_LEN),
        });
    }
    if !RELEASE_NAME_RE.is_match(name) {
        return Err(CoreError::InvalidReleaseName {
            name: name.to_string(),
            reason: "must consist of lowercase alphanumerics, '-' or '.'".to_string(),
        });
    }
    Ok(())
}

/// The revision currently considered live: highest version with status Deployed
///
/// Derived from history instead of relying on every writer to supersede
/// older records.
pub fn active_revision(history: &[Release]) -> Option<&Release> {
    history
        .iter()
        .filter(|r| r.info.status == ReleaseStatus::Deployed)
        .max_by_key(|r| r.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(version: u32, status: ReleaseStatus) -> Release {
        let mut r = Release::for_install("demo", "default", String::new());
        r.version = version;
        r.info.status = status;
        r
    }

    #[test]
    fn test_for_install_starts_at_init() {
        let r = Release::for_install("demo", "default", "kind: ConfigMap".to_string());
        assert_eq!(r.version, 1);
        assert_eq!(r.info.status, ReleaseStatus::PendingInstall);
        assert_eq!(r.info.last_phase, Some(Phase::Init));
        assert_eq!(r.info.last_stage, Some(0));
    }

    #[test]
    fn test_for_upgrade_bumps_version() {
        let mut prev = release(3, ReleaseStatus::Deployed);
        prev.labels.insert("team".to_string(), "web".to_string());

        let next = Release::for_upgrade(&prev, "new".to_string());
        assert_eq!(next.version, 4);
        assert_eq!(next.info.status, ReleaseStatus::PendingUpgrade);
        assert_eq!(next.info.first_deployed, prev.info.first_deployed);
        assert_eq!(next.labels.get("team").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_for_rollback_uses_target_manifest() {
        let mut target = release(1, ReleaseStatus::Superseded);
        target.manifest = "v1 manifest".to_string();
        let current = release(2, ReleaseStatus::Deployed);

        let rb = Release::for_rollback(&current, &target);
        assert_eq!(rb.version, 3);
        assert_eq!(rb.manifest, "v1 manifest");
        assert_eq!(rb.info.status, ReleaseStatus::PendingRollback);
        assert_eq!(rb.info.description, "Rollback to 1");
    }

    #[test]
    fn test_checkpoint_setters() {
        let mut r = release(1, ReleaseStatus::PendingInstall);

        r.set_hook_phase(2, HookEvent::PreInstall);
        assert_eq!(r.info.last_phase, Some(Phase::HooksPre));
        assert_eq!(r.info.last_stage, Some(2));

        r.set_rollout_phase(1);
        assert_eq!(r.info.last_phase, Some(Phase::Rollout));
        assert_eq!(r.info.last_stage, Some(1));

        r.set_uninstall_phase();
        assert_eq!(r.info.last_phase, Some(Phase::Uninstall));
        assert_eq!(r.info.last_stage, None);
    }

    #[test]
    fn test_status_transitions() {
        let mut r = release(1, ReleaseStatus::PendingInstall);
        assert!(r.info.status.is_pending());

        r.mark_failed("boom");
        assert_eq!(r.info.status, ReleaseStatus::Failed);
        assert!(r.info.status.is_uninstallable());

        r.mark_uninstalling();
        assert!(r.info.deleted.is_some());
        assert!(r.info.status.is_pending());

        r.mark_uninstalled("Uninstallation complete");
        assert_eq!(r.info.status.to_string(), "uninstalled");
    }

    #[test]
    fn test_validate_release_name() {
        assert!(validate_release_name("demo").is_ok());
        assert!(validate_release_name("my-app.v2").is_ok());
        assert!(validate_release_name("").is_err());
        assert!(validate_release_name("Demo").is_err());
        assert!(validate_release_name("-demo").is_err());
        assert!(validate_release_name(&"a".repeat(54)).is_err());
    }

    #[test]
    fn test_active_revision() {
        let history = vec![
            release(1, ReleaseStatus::Deployed),
            release(2, ReleaseStatus::Deployed),
            release(3, ReleaseStatus::Failed),
        ];
        assert_eq!(active_revision(&history).map(|r| r.version), Some(2));
        assert!(active_revision(&[]).is_none());
    }

    #[test]
    fn test_hooks_for_sorted_by_weight() {
        let mut r = release(1, ReleaseStatus::PendingInstall);
        for (name, weight) in [("b", 5), ("a", 5), ("c", -1)] {
            r.hooks.push(Hook {
                name: name.to_string(),
                kind: "Job".to_string(),
                path: String::new(),
                manifest: String::new(),
                events: vec![HookEvent::PreInstall],
                weight,
            });
        }

        let names: Vec<&str> = r
            .hooks_for(HookEvent::PreInstall)
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert!(r.hooks_for(HookEvent::PostInstall).is_empty());
    }

    #[test]
    fn test_release_json_roundtrip_keeps_checkpoint() {
        let mut r = release(2, ReleaseStatus::PendingUpgrade);
        r.set_rollout_phase(1);

        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"lastPhase\":\"rollout\""));

        let back: Release = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
