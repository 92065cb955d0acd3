//! In-memory cluster for testing
//!
//! Keeps a list of live objects, records every call and lets tests inject
//! failures per resource (by display name, e.g. `default:ConfigMap/a`).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    ApplyResult, ClusterClient, DeleteOptions, OperationResult, PartialApply, UpdateOptions,
    foreign_owner,
};
use crate::error::{KubeError, Result};
use crate::mapping::StaticTypeMapper;
use crate::ordering::{sort_for_apply, sort_for_delete};
use crate::resource::{ResourceInfo, ResourceList, parse_manifest};

/// A recorded call, with resources in display form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    Create(Vec<String>),
    Update {
        current: Vec<String>,
        target: Vec<String>,
        force: bool,
    },
    Delete(Vec<String>),
    Wait(Vec<String>),
    WaitWithJobs(Vec<String>),
    WaitForDelete(Vec<String>),
    RecreatePods(Vec<String>),
}

#[derive(Debug, Default)]
struct MockState {
    live: ResourceList,
    calls: Vec<ClusterCall>,
    unreachable: bool,
    fail_apply: HashSet<String>,
    fail_wait: HashSet<String>,
    fail_delete: HashSet<String>,
}

/// In-memory cluster client for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
    mapper: StaticTypeMapper,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a mapper that knows additional types
    pub fn with_mapper(mut self, mapper: StaticTypeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put objects in the cluster without recording a call
    pub fn seed(&self, resources: &ResourceList) {
        let mut state = self.state();
        state.live.merge(resources.clone());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Make create/update of `resource` fail
    pub fn fail_apply_of(&self, resource: &str) {
        self.state().fail_apply.insert(resource.to_string());
    }

    /// Make waiting on `resource` fail
    pub fn fail_wait_for(&self, resource: &str) {
        self.state().fail_wait.insert(resource.to_string());
    }

    /// Make deleting `resource` fail
    pub fn fail_delete_of(&self, resource: &str) {
        self.state().fail_delete.insert(resource.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_apply.clear();
        state.fail_wait.clear();
        state.fail_delete.clear();
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    pub fn live_resources(&self) -> ResourceList {
        self.state().live.clone()
    }

    pub fn live_names(&self) -> Vec<String> {
        self.state().live.names()
    }

    pub fn is_live(&self, resource: &str) -> bool {
        self.state().live.iter().any(|r| r.to_string() == resource)
    }

    fn check_apply(state: &MockState, info: &ResourceInfo) -> Result<()> {
        let name = info.to_string();
        if state.fail_apply.contains(&name) {
            return Err(KubeError::ResourceFailed {
                resource: name,
                message: "admission webhook denied the request".to_string(),
            });
        }
        Ok(())
    }

    fn check_wait(&self, resources: &ResourceList) -> Result<()> {
        let state = self.state();
        for info in resources {
            let name = info.to_string();
            if state.fail_wait.contains(&name) {
                return Err(KubeError::ResourceFailed {
                    resource: name,
                    message: "not ready".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn is_reachable(&self) -> Result<()> {
        if self.state().unreachable {
            return Err(KubeError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn build(&self, manifest: &str, namespace: &str) -> Result<ResourceList> {
        parse_manifest(manifest, namespace, &self.mapper)
    }

    async fn get(&self, info: &ResourceInfo) -> Result<Option<ResourceInfo>> {
        Ok(self.state().live.get(info).cloned())
    }

    async fn create(&self, resources: &ResourceList) -> ApplyResult {
        let mut state = self.state();
        state.calls.push(ClusterCall::Create(resources.names()));

        let mut result = OperationResult::default();
        for info in sort_for_apply(resources) {
            if let Err(e) = Self::check_apply(&state, &info) {
                return Err(PartialApply::new(result, e));
            }
            if state.live.contains(&info) {
                let e = KubeError::ResourceFailed {
                    resource: info.to_string(),
                    message: "already exists".to_string(),
                };
                return Err(PartialApply::new(result, e));
            }
            state.live.push(info.clone());
            result.created.push(info);
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
        let mut state = self.state();
        state.calls.push(ClusterCall::Update {
            current: current.names(),
            target: target.names(),
            force,
        });

        let mut result = OperationResult::default();
        for info in sort_for_apply(target) {
            if let Err(e) = Self::check_apply(&state, &info) {
                return Err(PartialApply::new(result, e));
            }
            let live = state.live.get(&info).cloned();
            if let Some(owner) = live.as_ref().and_then(|live| {
                foreign_owner(live, &options.release_name, &options.release_namespace)
            }) {
                if !options.ignore_ownership_mismatch {
                    let e = KubeError::OwnershipMismatch {
                        resource: info.to_string(),
                        owner,
                    };
                    return Err(PartialApply::new(result, e));
                }
            }
            let existed = live.is_some();
            state.live.merge(ResourceList::from(vec![info.clone()]));
            if existed {
                result.updated.push(info);
            } else {
                result.created.push(info);
            }
        }

        for info in sort_for_delete(&current.difference(target)) {
            let Some(live) = state.live.get(&info).cloned() else {
                continue;
            };
            if options.skip_delete_if_invalid_ownership
                && foreign_owner(&live, &options.release_name, &options.release_namespace)
                    .is_some()
            {
                continue;
            }
            state.live = state.live.filter(|r| !r.is_same(&info));
            result.deleted.push(info);
        }

        Ok(result)
    }

    async fn delete(
        &self,
        resources: &ResourceList,
        options: &DeleteOptions,
    ) -> (OperationResult, Vec<KubeError>) {
        let mut state = self.state();
        state.calls.push(ClusterCall::Delete(resources.names()));

        let mut result = OperationResult::default();
        let mut errors = Vec::new();
        for info in sort_for_delete(resources) {
            let name = info.to_string();
            if state.fail_delete.contains(&name) {
                errors.push(KubeError::ResourceFailed {
                    resource: name,
                    message: "the server is currently unable to handle the request".to_string(),
                });
                continue;
            }
            let Some(live) = state.live.get(&info).cloned() else {
                continue;
            };
            if let Some(owner) =
                foreign_owner(&live, &options.release_name, &options.release_namespace)
            {
                if !options.skip_if_invalid_ownership {
                    errors.push(KubeError::OwnershipMismatch {
                        resource: name,
                        owner,
                    });
                }
                continue;
            }
            state.live = state.live.filter(|r| !r.is_same(&info));
            result.deleted.push(info);
        }

        if options.wait {
            state
                .calls
                .push(ClusterCall::WaitForDelete(result.deleted.names()));
        }

        (result, errors)
    }

    async fn wait(&self, resources: &ResourceList, _timeout: Duration) -> Result<()> {
        self.state().calls.push(ClusterCall::Wait(resources.names()));
        self.check_wait(resources)
    }

    async fn wait_with_jobs(&self, resources: &ResourceList, _timeout: Duration) -> Result<()> {
        self.state()
            .calls
            .push(ClusterCall::WaitWithJobs(resources.names()));
        self.check_wait(resources)
    }

    async fn wait_for_delete(&self, resources: &ResourceList, _timeout: Duration) -> Result<()> {
        self.state()
            .calls
            .push(ClusterCall::WaitForDelete(resources.names()));
        Ok(())
    }

    async fn recreate_pods(&self, resources: &ResourceList) -> Result<()> {
        self.state()
            .calls
            .push(ClusterCall::RecreatePods(resources.names()));
        Ok(())
    }
}
