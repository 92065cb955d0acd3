//! Resource identity and set algebra
//!
//! A [`ResourceInfo`] is one object of a release. Set operations on
//! [`ResourceList`] compare resources by name, namespace and kind only, so
//! the same Deployment served as `apps/v1` and `apps/v1beta2` is one resource.

use std::collections::BTreeMap;

use kube::api::{DynamicObject, ObjectMeta};
use kube::core::{GroupVersionKind, TypeMeta};

use crate::annotations::{self, MANAGED_BY, MANAGED_BY_LABEL};
use crate::error::{KubeError, Result};
use crate::mapping::{TypeMapper, TypeMapping, api_version, parse_api_version};

/// One resource of a release
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub name: String,
    /// `None` for cluster-scoped resources
    pub namespace: Option<String>,
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

impl ResourceInfo {
    /// Minimal object carrying only type and identity
    pub fn new(mapping: &TypeMapping, name: impl Into<String>, namespace: Option<String>) -> Self {
        let name = name.into();
        let namespace = if mapping.namespaced { namespace } else { None };

        let object = DynamicObject {
            types: Some(TypeMeta {
                api_version: mapping.api_version(),
                kind: mapping.gvk.kind.clone(),
            }),
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: namespace.clone(),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };

        Self {
            name,
            namespace,
            gvk: mapping.gvk.clone(),
            object,
        }
    }

    /// Wrap a parsed object, defaulting the namespace of namespaced types
    pub fn from_object(
        mut object: DynamicObject,
        default_namespace: &str,
        mapper: &dyn TypeMapper,
    ) -> Result<Self> {
        let types = object.types.as_ref().ok_or_else(|| {
            KubeError::InvalidManifest("resource missing apiVersion or kind".to_string())
        })?;
        let (group, version) = parse_api_version(&types.api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, &types.kind);

        let name = object
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                KubeError::InvalidManifest(format!("{} resource missing metadata.name", gvk.kind))
            })?;

        let mapping = mapper.mapping_for(&gvk)?;
        let namespace = if mapping.namespaced {
            let ns = object
                .metadata
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| default_namespace.to_string());
            object.metadata.namespace = Some(ns.clone());
            Some(ns)
        } else {
            object.metadata.namespace = None;
            None
        };

        Ok(Self {
            name,
            namespace,
            gvk,
            object,
        })
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    pub fn api_version(&self) -> String {
        api_version(&self.gvk)
    }

    /// Identity comparison: name, namespace and kind
    pub fn is_same(&self, other: &ResourceInfo) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.gvk.kind == other.gvk.kind
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.object.metadata.annotations.as_ref()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Check if resource has keep policy annotation
    pub fn has_keep_policy(&self) -> bool {
        self.annotations()
            .map(annotations::has_keep_policy)
            .unwrap_or(false)
    }

    /// Release recorded as the owner of this object, if any
    pub fn owner_release(&self) -> Option<(&str, &str)> {
        let name = self.annotation(annotations::bosun::RELEASE_NAME)?;
        let namespace = self
            .annotation(annotations::bosun::RELEASE_NAMESPACE)
            .unwrap_or_default();
        Some((name, namespace))
    }

    /// Stamp ownership annotations and the managed-by label
    pub fn set_release_metadata(&mut self, release_name: &str, release_namespace: &str) {
        let meta = &mut self.object.metadata;
        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(
            annotations::bosun::RELEASE_NAME.to_string(),
            release_name.to_string(),
        );
        annotations.insert(
            annotations::bosun::RELEASE_NAMESPACE.to_string(),
            release_namespace.to_string(),
        );
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    }
}

impl std::fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}:{}/{}", ns, self.gvk.kind, self.name),
            None => write!(f, "{}/{}", self.gvk.kind, self.name),
        }
    }
}

/// Ordered collection of resources with identity-based set operations
#[derive(Debug, Clone, Default)]
pub struct ResourceList(Vec<ResourceInfo>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceInfo> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ResourceInfo> {
        self.0.iter_mut()
    }

    pub fn push(&mut self, info: ResourceInfo) {
        self.0.push(info);
    }

    /// Append all resources of `other`, keeping duplicates
    pub fn append(&mut self, other: ResourceList) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, info: &ResourceInfo) -> bool {
        self.0.iter().any(|r| r.is_same(info))
    }

    /// Resource with the same identity as `info`
    pub fn get(&self, info: &ResourceInfo) -> Option<&ResourceInfo> {
        self.0.iter().find(|r| r.is_same(info))
    }

    /// Resources of `self` that are not in `other`
    pub fn difference(&self, other: &ResourceList) -> ResourceList {
        self.filter(|r| !other.contains(r))
    }

    /// Resources of `self` that are also in `other`
    pub fn intersect(&self, other: &ResourceList) -> ResourceList {
        self.filter(|r| other.contains(r))
    }

    /// Replace resources sharing an identity with `other`'s and append the rest
    pub fn merge(&mut self, other: ResourceList) {
        self.0.retain(|r| !other.contains(r));
        self.0.extend(other.0);
    }

    pub fn filter(&self, predicate: impl Fn(&ResourceInfo) -> bool) -> ResourceList {
        self.0.iter().filter(|r| predicate(r)).cloned().collect()
    }

    /// Call `f` for every resource, stopping at the first error
    pub fn visit(&self, mut f: impl FnMut(&ResourceInfo) -> Result<()>) -> Result<()> {
        for info in &self.0 {
            f(info)?;
        }
        Ok(())
    }

    /// Identities in display form, in list order
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }

    pub fn set_release_metadata(&mut self, release_name: &str, release_namespace: &str) {
        for info in &mut self.0 {
            info.set_release_metadata(release_name, release_namespace);
        }
    }

    pub fn into_vec(self) -> Vec<ResourceInfo> {
        self.0
    }
}

impl From<Vec<ResourceInfo>> for ResourceList {
    fn from(v: Vec<ResourceInfo>) -> Self {
        Self(v)
    }
}

impl FromIterator<ResourceInfo> for ResourceList {
    fn from_iter<I: IntoIterator<Item = ResourceInfo>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<ResourceInfo> for ResourceList {
    fn extend<I: IntoIterator<Item = ResourceInfo>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ResourceList {
    type Item = ResourceInfo;
    type IntoIter = std::vec::IntoIter<ResourceInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResourceList {
    type Item = &'a ResourceInfo;
    type IntoIter = std::slice::Iter<'a, ResourceInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parse a multi-document YAML manifest into resources
///
/// Empty and comment-only documents are skipped. Namespaced resources without
/// a namespace get `default_namespace`.
pub fn parse_manifest(
    manifest: &str,
    default_namespace: &str,
    mapper: &dyn TypeMapper,
) -> Result<ResourceList> {
    let mut resources = ResourceList::new();

    for (index, doc) in split_documents(manifest).into_iter().enumerate() {
        let object: DynamicObject = serde_yaml::from_str(&doc).map_err(|e| {
            KubeError::InvalidManifest(format!("failed to parse document {}: {}", index, e))
        })?;
        let info = ResourceInfo::from_object(object, default_namespace, mapper).map_err(|e| {
            KubeError::InvalidManifest(format!("failed to parse document {}: {}", index, e))
        })?;
        resources.push(info);
    }

    Ok(resources)
}

fn split_documents(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in manifest.lines() {
        if line.starts_with("---") {
            docs.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    docs.push(current);

    docs.into_iter()
        .filter(|doc| {
            !doc.lines()
                .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::mapping::StaticTypeMapper;

    /// Resource of a built-in type string, e.g. `info("cm", "a", Some("web"))`
    pub fn info(resource_type: &str, name: &str, namespace: Option<&str>) -> ResourceInfo {
        let mapping = StaticTypeMapper::new()
            .resolve_type(resource_type)
            .unwrap();
        ResourceInfo::new(&mapping, name, namespace.map(String::from))
    }

    pub fn cm(name: &str) -> ResourceInfo {
        info("cm", name, Some("default"))
    }

    pub fn list(items: Vec<ResourceInfo>) -> ResourceList {
        ResourceList::from(items)
    }
}
