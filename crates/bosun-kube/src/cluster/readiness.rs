//! Readiness evaluation of live objects
//!
//! Workloads are ready when all replicas run the new version; Jobs only count
//! when waiting with jobs; kinds without a rollout status are ready as soon as
//! they exist.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Still converging, with a progress message
    Pending(String),
    /// Will not become ready without intervention
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    /// Evaluate a live object of the given kind
    pub fn of(kind: &str, object: &DynamicObject, with_jobs: bool) -> Result<Self> {
        Ok(match kind {
            "Deployment" => deployment(&typed(object)?),
            "StatefulSet" => statefulset(&typed(object)?),
            "DaemonSet" => daemonset(&typed(object)?),
            "Pod" => pod(&typed(object)?),
            "PersistentVolumeClaim" => pvc(&typed(object)?),
            "Job" if with_jobs => job(&typed(object)?),
            _ => Readiness::Ready,
        })
    }
}

fn typed<K: DeserializeOwned>(object: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn deployment(d: &Deployment) -> Readiness {
    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = d.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    let generation = d.metadata.generation.unwrap_or(0);
    let observed = status.and_then(|s| s.observed_generation).unwrap_or(0);

    let failed = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| {
            c.iter().find(|cond| {
                cond.type_ == "Progressing"
                    && cond.reason.as_deref() == Some("ProgressDeadlineExceeded")
            })
        })
        .map(|cond| cond.message.clone().unwrap_or_default());

    if let Some(message) = failed {
        return Readiness::Failed(message);
    }

    if observed >= generation && ready == desired && updated == desired && available == desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ))
    }
}

fn statefulset(sts: &StatefulSet) -> Readiness {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = sts.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);

    let current_rev = status.and_then(|s| s.current_revision.as_ref());
    let update_rev = status.and_then(|s| s.update_revision.as_ref());
    let revision_match = current_rev == update_rev;

    if ready == desired && updated == desired && revision_match {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated, revision match: {}",
            ready, desired, updated, desired, revision_match
        ))
    }
}

fn daemonset(ds: &DaemonSet) -> Readiness {
    let status = ds.status.as_ref();
    let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
    let ready = status.map(|s| s.number_ready).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_number_scheduled).unwrap_or(0);

    if ready == desired && updated == desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated",
            ready, desired, updated, desired
        ))
    }
}

fn pod(p: &Pod) -> Readiness {
    let status = p.status.as_ref();
    match status.and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => return Readiness::Ready,
        Some("Failed") => {
            let reason = status
                .and_then(|s| s.message.clone())
                .unwrap_or_else(|| "pod failed".to_string());
            return Readiness::Failed(reason);
        }
        _ => {}
    }

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|c| c.iter().any(|cond| cond.type_ == "Ready" && cond.status == "True"));

    if ready {
        Readiness::Ready
    } else {
        Readiness::Pending("pod not ready".to_string())
    }
}

fn pvc(claim: &PersistentVolumeClaim) -> Readiness {
    match claim.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Bound") => Readiness::Ready,
        Some("Lost") => Readiness::Failed("claim lost its volume".to_string()),
        phase => Readiness::Pending(format!("claim is {}", phase.unwrap_or("unknown"))),
    }
}

fn job(j: &Job) -> Readiness {
    let status = j.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);
    let active = status.and_then(|s| s.active).unwrap_or(0);

    let failed_condition = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| {
            c.iter()
                .find(|cond| cond.type_ == "Failed" && cond.status == "True")
        });

    if let Some(cond) = failed_condition {
        return Readiness::Failed(
            cond.message
                .clone()
                .unwrap_or_else(|| format!("job failed with {} failures", failed)),
        );
    }

    if succeeded > 0 {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("{} active, {} succeeded", active, succeeded))
    }
}
