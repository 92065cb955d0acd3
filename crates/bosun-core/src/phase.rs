//! Lifecycle phases of a release operation and the hook events that map onto them

use serde::{Deserialize, Serialize};

/// Named segment of a release operation
///
/// Persisted on the release together with the stage index as the only
/// resumption checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Init,
    HooksPre,
    Rollout,
    Uninstall,
    HooksPost,
}

impl Phase {
    /// Phase a hook event runs in, `None` for events outside any operation (tests)
    pub fn from_hook_event(event: HookEvent) -> Option<Phase> {
        match event {
            HookEvent::PreInstall
            | HookEvent::PreUpgrade
            | HookEvent::PreRollback
            | HookEvent::PreDelete => Some(Phase::HooksPre),
            HookEvent::PostInstall
            | HookEvent::PostUpgrade
            | HookEvent::PostRollback
            | HookEvent::PostDelete => Some(Phase::HooksPost),
            HookEvent::Test => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::HooksPre => "hooks-pre",
            Phase::Rollout => "rollout",
            Phase::Uninstall => "uninstall",
            Phase::HooksPost => "hooks-post",
        };
        write!(f, "{}", s)
    }
}

/// Hook trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    Test,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookEvent::PreInstall => "pre-install",
            HookEvent::PostInstall => "post-install",
            HookEvent::PreUpgrade => "pre-upgrade",
            HookEvent::PostUpgrade => "post-upgrade",
            HookEvent::PreRollback => "pre-rollback",
            HookEvent::PostRollback => "post-rollback",
            HookEvent::PreDelete => "pre-delete",
            HookEvent::PostDelete => "post-delete",
            HookEvent::Test => "test",
        };
        write!(f, "{}", s)
    }
}
