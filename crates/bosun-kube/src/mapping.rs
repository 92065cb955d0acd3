//! Resource type resolution
//!
//! Turns the type strings users write (`deploy`, `deployments.apps`,
//! `deployment.v1.apps`, `Deployment`) and the GVKs found in manifests into a
//! [`TypeMapping`] carrying the plural name and the scope of the type.

use kube::core::GroupVersionKind;
use kube::discovery::{Discovery, Scope};

use crate::error::{KubeError, Result};

/// Resolved resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub gvk: GroupVersionKind,
    pub plural: String,
    pub namespaced: bool,
}

impl TypeMapping {
    pub fn api_version(&self) -> String {
        api_version(&self.gvk)
    }
}

/// Resolves resource types to group/version/kind and scope
pub trait TypeMapper: Send + Sync {
    /// Resolve a user-facing type string
    fn resolve_type(&self, resource_type: &str) -> Result<TypeMapping>;

    /// Resolve the GVK of a parsed object
    fn mapping_for(&self, gvk: &GroupVersionKind) -> Result<TypeMapping>;
}

/// `apiVersion` string of a GVK (`v1` for the core group)
pub fn api_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

/// Split `apps/v1` into group and version
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// A type string broken into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypeQuery {
    resource: String,
    version: Option<String>,
    group: Option<String>,
}

impl TypeQuery {
    fn parse(resource_type: &str) -> Result<Self> {
        let trimmed = resource_type.trim();
        if trimmed.is_empty() {
            return Err(KubeError::UnknownResourceType(resource_type.to_string()));
        }

        let mut parts = trimmed.splitn(2, '.');
        let resource = parts.next().unwrap_or_default().to_lowercase();
        let rest = parts.next();

        let (version, group) = match rest {
            None => (None, None),
            Some(rest) => match rest.split_once('.') {
                Some((first, group)) if looks_like_version(first) => {
                    (Some(first.to_string()), Some(group.to_string()))
                }
                _ if looks_like_version(rest) => (Some(rest.to_string()), Some(String::new())),
                _ => (None, Some(rest.to_string())),
            },
        };

        Ok(Self {
            resource,
            version,
            group,
        })
    }

    fn matches_group(&self, group: &str) -> bool {
        self.group.as_deref().is_none_or(|g| g == group)
    }

    fn matches_version(&self, version: &str) -> bool {
        self.version.as_deref().is_none_or(|v| v == version)
    }
}

fn looks_like_version(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('v') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// (group, version, kind, plural, short names, namespaced)
type KnownType = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static [&'static str],
    bool,
);

const BUILTIN_TYPES: &[KnownType] = &[
    ("", "v1", "Pod", "pods", &["po"], true),
    ("", "v1", "Service", "services", &["svc"], true),
    ("", "v1", "ConfigMap", "configmaps", &["cm"], true),
    ("", "v1", "Secret", "secrets", &[], true),
    ("", "v1", "ServiceAccount", "serviceaccounts", &["sa"], true),
    ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", &["pvc"], true),
    ("", "v1", "PersistentVolume", "persistentvolumes", &["pv"], false),
    ("", "v1", "Namespace", "namespaces", &["ns"], false),
    ("", "v1", "Endpoints", "endpoints", &["ep"], true),
    ("", "v1", "ResourceQuota", "resourcequotas", &["quota"], true),
    ("", "v1", "LimitRange", "limitranges", &["limits"], true),
    ("apps", "v1", "Deployment", "deployments", &["deploy"], true),
    ("apps", "v1", "StatefulSet", "statefulsets", &["sts"], true),
    ("apps", "v1", "DaemonSet", "daemonsets", &["ds"], true),
    ("apps", "v1", "ReplicaSet", "replicasets", &["rs"], true),
    ("batch", "v1", "Job", "jobs", &[], true),
    ("batch", "v1", "CronJob", "cronjobs", &["cj"], true),
    ("networking.k8s.io", "v1", "Ingress", "ingresses", &["ing"], true),
    ("networking.k8s.io", "v1", "IngressClass", "ingressclasses", &[], false),
    ("networking.k8s.io", "v1", "NetworkPolicy", "networkpolicies", &["netpol"], true),
    ("rbac.authorization.k8s.io", "v1", "Role", "roles", &[], true),
    ("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", &[], true),
    ("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", &[], false),
    ("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", "clusterrolebindings", &[], false),
    ("autoscaling", "v2", "HorizontalPodAutoscaler", "horizontalpodautoscalers", &["hpa"], true),
    ("policy", "v1", "PodDisruptionBudget", "poddisruptionbudgets", &["pdb"], true),
    ("storage.k8s.io", "v1", "StorageClass", "storageclasses", &["sc"], false),
    (
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        "customresourcedefinitions",
        &["crd", "crds"],
        false,
    ),
];

/// One entry of a [`StaticTypeMapper`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub mapping: TypeMapping,
    pub short_names: Vec<String>,
}

impl TypeEntry {
    pub fn new(
        group: &str,
        version: &str,
        kind: &str,
        plural: &str,
        namespaced: bool,
    ) -> Self {
        Self {
            mapping: TypeMapping {
                gvk: GroupVersionKind::gvk(group, version, kind),
                plural: plural.to_string(),
                namespaced,
            },
            short_names: Vec::new(),
        }
    }

    pub fn with_short_names(mut self, names: &[&str]) -> Self {
        self.short_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    fn matches_name(&self, resource: &str) -> bool {
        let kind = self.mapping.gvk.kind.to_lowercase();
        resource == kind
            || resource == self.mapping.plural
            || self.short_names.iter().any(|s| s == resource)
    }
}

/// Type mapper over a fixed table of built-in and registered types
///
/// Used when no cluster is available (dry-run, tests).
#[derive(Debug, Clone)]
pub struct StaticTypeMapper {
    entries: Vec<TypeEntry>,
}

impl StaticTypeMapper {
    /// Mapper that knows the built-in Kubernetes types
    pub fn new() -> Self {
        let entries = BUILTIN_TYPES
            .iter()
            .map(|(group, version, kind, plural, short_names, namespaced)| {
                TypeEntry::new(group, version, kind, plural, *namespaced)
                    .with_short_names(short_names)
            })
            .collect();
        Self { entries }
    }

    /// Register an additional type, e.g. one defined by a CRD
    pub fn with_type(mut self, entry: TypeEntry) -> Self {
        self.entries.push(entry);
        self
    }
}

impl Default for StaticTypeMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeMapper for StaticTypeMapper {
    fn resolve_type(&self, resource_type: &str) -> Result<TypeMapping> {
        let query = TypeQuery::parse(resource_type)?;

        self.entries
            .iter()
            .find(|e| {
                e.matches_name(&query.resource)
                    && query.matches_group(&e.mapping.gvk.group)
                    && query.matches_version(&e.mapping.gvk.version)
            })
            .map(|e| e.mapping.clone())
            .ok_or_else(|| KubeError::UnknownResourceType(resource_type.to_string()))
    }

    fn mapping_for(&self, gvk: &GroupVersionKind) -> Result<TypeMapping> {
        // Any served version of a known group/kind resolves; the object's own
        // version is kept.
        self.entries
            .iter()
            .find(|e| e.mapping.gvk.group == gvk.group && e.mapping.gvk.kind == gvk.kind)
            .map(|e| TypeMapping {
                gvk: gvk.clone(),
                plural: e.mapping.plural.clone(),
                namespaced: e.mapping.namespaced,
            })
            .ok_or_else(|| {
                KubeError::UnknownResourceType(format!("{}/{}", api_version(gvk), gvk.kind))
            })
    }
}

/// Type mapper backed by the API server's discovery information
pub struct DiscoveryTypeMapper {
    discovery: Discovery,
}

impl DiscoveryTypeMapper {
    /// Run discovery against the cluster
    pub async fn new(client: kube::Client) -> Result<Self> {
        let discovery = Discovery::new(client).run().await?;
        Ok(Self { discovery })
    }

    pub fn from_discovery(discovery: Discovery) -> Self {
        Self { discovery }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }
}

impl TypeMapper for DiscoveryTypeMapper {
    fn resolve_type(&self, resource_type: &str) -> Result<TypeMapping> {
        let query = TypeQuery::parse(resource_type)?;

        for group in self.discovery.groups() {
            if !query.matches_group(group.name()) {
                continue;
            }

            let resources = match &query.version {
                Some(version) => group.versioned_resources(version),
                None => group.recommended_resources(),
            };

            for (ar, caps) in resources {
                let kind = ar.kind.to_lowercase();
                if query.resource == kind || query.resource == ar.plural {
                    return Ok(TypeMapping {
                        gvk: GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind),
                        plural: ar.plural.clone(),
                        namespaced: caps.scope == Scope::Namespaced,
                    });
                }
            }
        }

        Err(KubeError::UnknownResourceType(resource_type.to_string()))
    }

    fn mapping_for(&self, gvk: &GroupVersionKind) -> Result<TypeMapping> {
        let (ar, caps) = self.discovery.resolve_gvk(gvk).ok_or_else(|| {
            KubeError::UnknownResourceType(format!("{}/{}", api_version(gvk), gvk.kind))
        })?;

        Ok(TypeMapping {
            gvk: gvk.clone(),
            plural: ar.plural,
            namespaced: caps.scope == Scope::Namespaced,
        })
    }
}
