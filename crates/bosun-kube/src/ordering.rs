//! Creation and deletion order of resource kinds
//!
//! Inside one stage, resources are created dependencies first (namespaces,
//! CRDs, RBAC, config, then workloads) and deleted in the reverse order.

use crate::resource::{ResourceInfo, ResourceList};

/// Resource category for ordering operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    /// CustomResourceDefinition - installed first
    Crd = 0,
    /// Namespace - created before namespace-scoped resources
    Namespace = 1,
    /// ResourceQuota, LimitRange
    NamespaceConfig = 2,
    /// ClusterRole, ClusterRoleBinding
    ClusterRbac = 10,
    /// Role, RoleBinding, ServiceAccount
    NamespacedRbac = 11,
    /// ConfigMap, Secret
    Config = 20,
    /// PersistentVolume, PersistentVolumeClaim, StorageClass
    Storage = 21,
    /// NetworkPolicy, Service, Endpoints, Ingress
    Network = 30,
    /// Deployment, StatefulSet, DaemonSet, ReplicaSet, Pod
    Workload = 40,
    /// Job, CronJob
    Batch = 50,
    /// HorizontalPodAutoscaler, PodDisruptionBudget
    Autoscaling = 60,
    /// Custom Resources (using CRDs)
    CustomResource = 70,
    /// Everything else
    Other = 100,
}

const CORE_GROUPS: &[&str] = &[
    "",
    "apps",
    "batch",
    "autoscaling",
    "policy",
    "networking.k8s.io",
    "rbac.authorization.k8s.io",
    "storage.k8s.io",
    "apiextensions.k8s.io",
    "admissionregistration.k8s.io",
    "scheduling.k8s.io",
    "coordination.k8s.io",
    "discovery.k8s.io",
];

impl ResourceCategory {
    /// Categorize a resource by its kind and API group
    pub fn from_kind(kind: &str, group: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "PodDisruptionBudget" => Self::Autoscaling,
            _ if !CORE_GROUPS.contains(&group) => Self::CustomResource,
            _ => Self::Other,
        }
    }

    pub fn of(info: &ResourceInfo) -> Self {
        Self::from_kind(&info.gvk.kind, &info.gvk.group)
    }
}

/// Stable sort into creation order
pub fn sort_for_apply(resources: &ResourceList) -> ResourceList {
    let mut sorted: Vec<ResourceInfo> = resources.iter().cloned().collect();
    sorted.sort_by_key(ResourceCategory::of);
    sorted.into()
}

/// Stable sort into deletion order (reverse of creation)
pub fn sort_for_delete(resources: &ResourceList) -> ResourceList {
    let mut sorted: Vec<ResourceInfo> = resources.iter().cloned().collect();
    sorted.sort_by_key(|r| std::cmp::Reverse(ResourceCategory::of(r)));
    sorted.into()
}
