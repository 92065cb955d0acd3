//! Bosun Core - Release records and lifecycle types for the rollout engine
//!
//! This crate provides the foundational types used by `bosun-kube`:
//! - `Release`: One revision of a release, with status and rollout checkpoint
//! - `Phase`: Named segments of an operation (init, hooks, rollout, uninstall)
//! - `DeployReport`: Machine-readable outcome of an operation
//! - `Settings`: Engine configuration loaded from YAML
//! - `Diagnostics`: Warnings collected while resolving dependencies

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod phase;
pub mod release;
pub mod report;

pub use config::{Compression, Settings, SplitterKind};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{CoreError, Result};
pub use phase::{HookEvent, Phase};
pub use release::{
    Hook, MAX_RELEASE_NAME_LEN, Release, ReleaseInfo, ReleaseStatus, active_revision,
    validate_release_name,
};
pub use report::DeployReport;
