//! Hook execution
//!
//! A [`HookRunner`] runs a single hook. The [`HookExecutor`] sequences the
//! hooks of one event by weight, checkpoints each on the release and stops at
//! the first failure.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bosun_core::{Hook, HookEvent, Release};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{ClusterClient, DeleteOptions};
use crate::error::{KubeError, Result};
use crate::storage::StorageDriver;

/// Runs one hook to completion
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_hook(&self, release: &Release, hook: &Hook, timeout: Duration) -> Result<()>;
}

/// Runner that does nothing, for releases without hooks
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHookRunner;

#[async_trait]
impl HookRunner for NoopHookRunner {
    async fn run_hook(&self, _release: &Release, _hook: &Hook, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Runs hooks as cluster resources
///
/// The hook manifest is applied, waited on (including Job completion) and
/// deleted again once it succeeded. Failed hook resources are kept for
/// inspection.
pub struct ClusterHookRunner {
    cluster: Arc<dyn ClusterClient>,
}

impl ClusterHookRunner {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl HookRunner for ClusterHookRunner {
    async fn run_hook(&self, release: &Release, hook: &Hook, timeout: Duration) -> Result<()> {
        let mut resources = self.cluster.build(&hook.manifest, &release.namespace)?;
        resources.set_release_metadata(&release.name, &release.namespace);

        let (result, errors) = self
            .cluster
            .delete(
                &resources,
                &DeleteOptions {
                    wait: true,
                    wait_timeout: Some(timeout),
                    ..DeleteOptions::for_release(&release.name, &release.namespace)
                },
            )
            .await;
        if let Some(error) = errors.into_iter().next() {
            return Err(error);
        }
        if !result.deleted.is_empty() {
            debug!(hook = %hook.name, "removed hook resources of a previous run");
        }

        self.cluster.create(&resources).await?;
        self.cluster.wait_with_jobs(&resources, timeout).await?;

        let (_, errors) = self
            .cluster
            .delete(
                &resources,
                &DeleteOptions::for_release(&release.name, &release.namespace),
            )
            .await;
        if let Some(error) = errors.into_iter().next() {
            return Err(error);
        }
        Ok(())
    }
}

/// Test double that records hook runs and fails selected hooks
#[derive(Clone, Default)]
pub struct MockHookRunner {
    runs: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MockHookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_hook(&self, name: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
    }

    /// Names of the hooks run so far, in order
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HookRunner for MockHookRunner {
    async fn run_hook(&self, _release: &Release, hook: &Hook, _timeout: Duration) -> Result<()> {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook.name.clone());
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&hook.name)
        {
            return Err(KubeError::Timeout(format!("hook {} did not complete", hook.name)));
        }
        Ok(())
    }
}

/// Result of one hook run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    pub name: String,
    pub event: HookEvent,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Sequences the hooks of one event
pub struct HookExecutor<'a> {
    runner: &'a dyn HookRunner,
    storage: &'a dyn StorageDriver,
    timeout: Duration,
    checkpoint: bool,
    /// Results of executed hooks
    pub results: Vec<HookResult>,
}

impl<'a> HookExecutor<'a> {
    pub fn new(
        runner: &'a dyn HookRunner,
        storage: &'a dyn StorageDriver,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            storage,
            timeout,
            checkpoint: true,
            results: Vec::new(),
        }
    }

    /// Run hooks without touching the release checkpoint
    ///
    /// Used while uninstalling, where the checkpoint must keep describing
    /// what the rollout left on the cluster.
    pub fn without_checkpoint(mut self) -> Self {
        self.checkpoint = false;
        self
    }

    /// Run every hook of `event` in weight order, stopping at the first failure
    pub async fn execute(&mut self, release: &mut Release, event: HookEvent) -> Result<()> {
        let hooks: Vec<Hook> = release.hooks_for(event).into_iter().cloned().collect();
        if hooks.is_empty() {
            return Ok(());
        }
        info!(release = %release.name, %event, count = hooks.len(), "running hooks");

        for (index, hook) in hooks.iter().enumerate() {
            if self.checkpoint {
                release.set_hook_phase(index, event);
                self.storage.update(release).await?;
            }

            let started_at = Utc::now();
            let outcome = self.runner.run_hook(release, hook, self.timeout).await;
            self.results.push(HookResult {
                name: hook.name.clone(),
                event,
                success: outcome.is_ok(),
                error: outcome.as_ref().err().map(ToString::to_string),
                started_at,
                finished_at: Utc::now(),
            });

            if let Err(e) = outcome {
                return Err(KubeError::HookFailed {
                    hook: hook.name.clone(),
                    event: event.to_string(),
                    message: e.to_string(),
                });
            }
            debug!(hook = %hook.name, %event, "hook succeeded");
        }

        Ok(())
    }
}
