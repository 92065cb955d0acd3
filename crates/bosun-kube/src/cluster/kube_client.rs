//! [`ClusterClient`] over a live API server
//!
//! Applies use Server-Side Apply with the `bosun` field manager. Objects are
//! addressed dynamically through discovery, so any installed CRD works.

use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use kube::api::{
    Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy,
};
use kube::discovery::Scope;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::{
    ApplyResult, ClusterClient, DeleteOptions, DeletionCascade, OperationResult, PartialApply,
    Readiness, UpdateOptions, foreign_owner,
};
use crate::error::{KubeError, Result};
use crate::mapping::DiscoveryTypeMapper;
use crate::ordering::{sort_for_apply, sort_for_delete};
use crate::resource::{ResourceInfo, ResourceList, parse_manifest};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "bosun";

/// Pod template annotation bumped to restart workloads
const RESTARTED_AT: &str = "bosun.io/restartedAt";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cluster client backed by `kube`
pub struct KubeClusterClient {
    client: Client,
    mapper: DiscoveryTypeMapper,
}

impl KubeClusterClient {
    /// Create a client and run API discovery
    pub async fn new(client: Client) -> Result<Self> {
        let mapper = DiscoveryTypeMapper::new(client.clone()).await?;
        Ok(Self { client, mapper })
    }

    /// Create from the default kubeconfig or in-cluster environment
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Self::new(client).await
    }

    pub fn mapper(&self) -> &DiscoveryTypeMapper {
        &self.mapper
    }

    fn api_for(&self, info: &ResourceInfo) -> Result<Api<DynamicObject>> {
        let (ar, caps) = self
            .mapper
            .discovery()
            .resolve_gvk(&info.gvk)
            .ok_or_else(|| KubeError::UnknownResourceType(info.gvk.kind.clone()))?;

        Ok(match (&caps.scope, &info.namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn get_live(&self, info: &ResourceInfo) -> Result<Option<ResourceInfo>> {
        let live = self.api_for(info)?.get_opt(&info.name).await?;
        Ok(live.map(|object| ResourceInfo {
            object,
            ..info.clone()
        }))
    }

    async fn create_one(&self, info: &ResourceInfo) -> Result<()> {
        self.api_for(info)?
            .create(&PostParams::default(), &info.object)
            .await?;
        Ok(())
    }

    /// Apply one resource, returning whether it was created
    async fn apply_one(
        &self,
        info: &ResourceInfo,
        force: bool,
        options: &UpdateOptions,
    ) -> Result<bool> {
        let api = self.api_for(info)?;
        let live = api.get_opt(&info.name).await?;

        if let Some(live) = &live {
            let live = ResourceInfo {
                object: live.clone(),
                ..info.clone()
            };
            if let Some(owner) =
                foreign_owner(&live, &options.release_name, &options.release_namespace)
            {
                if !options.ignore_ownership_mismatch {
                    return Err(KubeError::OwnershipMismatch {
                        resource: info.to_string(),
                        owner,
                    });
                }
                warn!(resource = %info, %owner, "taking over resource owned by another release");
            }
        }

        match live {
            Some(live) if force => {
                let mut object = info.object.clone();
                object.metadata.resource_version = live.metadata.resource_version;
                api.replace(&info.name, &PostParams::default(), &object)
                    .await?;
                Ok(false)
            }
            live => {
                let params = PatchParams::apply(FIELD_MANAGER).force();
                api.patch(&info.name, &params, &Patch::Apply(&info.object))
                    .await?;
                Ok(live.is_none())
            }
        }
    }

    async fn delete_one(&self, info: &ResourceInfo, cascade: DeletionCascade) -> Result<bool> {
        let params = DeleteParams {
            propagation_policy: Some(match cascade {
                DeletionCascade::Background => PropagationPolicy::Background,
                DeletionCascade::Foreground => PropagationPolicy::Foreground,
                DeletionCascade::Orphan => PropagationPolicy::Orphan,
            }),
            ..Default::default()
        };

        match self.api_for(info)?.delete(&info.name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_ready(
        &self,
        resources: &ResourceList,
        timeout: Duration,
        with_jobs: bool,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut pending: Vec<&ResourceInfo> = resources.iter().collect();

        loop {
            let mut waiting = Vec::new();
            for info in pending {
                let Some(live) = self.api_for(info)?.get_opt(&info.name).await? else {
                    debug!(resource = %info, "not found yet");
                    waiting.push(info);
                    continue;
                };
                match Readiness::of(info.kind(), &live, with_jobs)? {
                    Readiness::Ready => {}
                    Readiness::Pending(progress) => {
                        debug!(resource = %info, %progress, "waiting");
                        waiting.push(info);
                    }
                    Readiness::Failed(message) => {
                        return Err(KubeError::ResourceFailed {
                            resource: info.to_string(),
                            message,
                        });
                    }
                }
            }

            if waiting.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let names: Vec<String> = waiting.iter().map(|i| i.to_string()).collect();
                return Err(KubeError::Timeout(format!(
                    "resources not ready after {:?}: {}",
                    timeout,
                    names.join(", ")
                )));
            }
            pending = waiting;
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn is_reachable(&self) -> Result<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| KubeError::Unreachable(e.to_string()))
    }

    fn build(&self, manifest: &str, namespace: &str) -> Result<ResourceList> {
        parse_manifest(manifest, namespace, &self.mapper)
    }

    async fn get(&self, info: &ResourceInfo) -> Result<Option<ResourceInfo>> {
        self.get_live(info).await
    }

    async fn create(&self, resources: &ResourceList) -> ApplyResult {
        let mut result = OperationResult::default();

        for info in sort_for_apply(resources) {
            match self.create_one(&info).await {
                Ok(()) => {
                    debug!(resource = %info, "created");
                    result.created.push(info);
                }
                Err(e) => return Err(PartialApply::new(result, e)),
            }
        }

        Ok(result)
    }

    async fn update(
        &self,
        current: &ResourceList,
        target: &ResourceList,
        force: bool,
        options: &UpdateOptions,
    ) -> ApplyResult {
        let mut result = OperationResult::default();

        for info in sort_for_apply(target) {
            match self.apply_one(&info, force, options).await {
                Ok(true) => {
                    debug!(resource = %info, "created");
                    result.created.push(info);
                }
                Ok(false) => {
                    debug!(resource = %info, force, "updated");
                    result.updated.push(info);
                }
                Err(e @ KubeError::OwnershipMismatch { .. }) => {
                    return Err(PartialApply::new(result, e));
                }
                Err(e) => {
                    let error = KubeError::ResourceFailed {
                        resource: info.to_string(),
                        message: e.to_string(),
                    };
                    return Err(PartialApply::new(result, error));
                }
            }
        }

        for info in sort_for_delete(&current.difference(target)) {
            let live = match self.get_live(&info).await {
                Ok(Some(live)) => live,
                Ok(None) => continue,
                Err(e) => return Err(PartialApply::new(result, e)),
            };
            if options.skip_delete_if_invalid_ownership
                && foreign_owner(&live, &options.release_name, &options.release_namespace)
                    .is_some()
            {
                info!(resource = %info, "not pruning resource owned by another release");
                continue;
            }
            match self.delete_one(&info, DeletionCascade::Background).await {
                Ok(true) => result.deleted.push(info),
                Ok(false) => {}
                Err(e) => return Err(PartialApply::new(result, e)),
            }
        }

        Ok(result)
    }

    async fn delete(
        &self,
        resources: &ResourceList,
        options: &DeleteOptions,
    ) -> (OperationResult, Vec<KubeError>) {
        let mut result = OperationResult::default();
        let mut errors = Vec::new();

        for info in sort_for_delete(resources) {
            let live = match self.get_live(&info).await {
                Ok(Some(live)) => live,
                Ok(None) => {
                    debug!(resource = %info, "already deleted");
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            if let Some(owner) =
                foreign_owner(&live, &options.release_name, &options.release_namespace)
            {
                if options.skip_if_invalid_ownership {
                    warn!(resource = %info, %owner, "skipping resource owned by another release");
                } else {
                    errors.push(KubeError::OwnershipMismatch {
                        resource: info.to_string(),
                        owner,
                    });
                }
                continue;
            }

            match self.delete_one(&info, options.cascade).await {
                Ok(true) => result.deleted.push(info),
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        if options.wait && !result.deleted.is_empty() {
            let timeout = options.wait_timeout.unwrap_or(Duration::from_secs(300));
            if let Err(e) = self.wait_for_delete(&result.deleted, timeout).await {
                errors.push(e);
            }
        }

        (result, errors)
    }

    async fn wait(&self, resources: &ResourceList, timeout: Duration) -> Result<()> {
        self.wait_ready(resources, timeout, false).await
    }

    async fn wait_with_jobs(&self, resources: &ResourceList, timeout: Duration) -> Result<()> {
        self.wait_ready(resources, timeout, true).await
    }

    async fn wait_for_delete(&self, resources: &ResourceList, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut pending: Vec<&ResourceInfo> = resources.iter().collect();

        loop {
            let mut remaining = Vec::new();
            for info in pending {
                if self.api_for(info)?.get_opt(&info.name).await?.is_some() {
                    remaining.push(info);
                }
            }
            if remaining.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let names: Vec<String> = remaining.iter().map(|i| i.to_string()).collect();
                return Err(KubeError::Timeout(format!(
                    "resources still present after {:?}: {}",
                    timeout,
                    names.join(", ")
                )));
            }
            pending = remaining;
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn recreate_pods(&self, resources: &ResourceList) -> Result<()> {
        let restarted_at = chrono::Utc::now().to_rfc3339();
        let patch = serde_json::json!({
            "spec": {"template": {"metadata": {"annotations": {RESTARTED_AT: restarted_at}}}}
        });

        for info in resources
            .iter()
            .filter(|i| matches!(i.kind(), "Deployment" | "StatefulSet" | "DaemonSet"))
        {
            self.api_for(info)?
                .patch(&info.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            info!(resource = %info, "restarted pods");
        }
        Ok(())
    }
}
