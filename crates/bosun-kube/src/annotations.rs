//! Annotation parsing with Helm compatibility
//!
//! Bosun reads `bosun.io/*` annotations and, for resource policy, also the
//! `helm.sh/*` equivalent to ease migration of existing charts.

use std::collections::BTreeMap;

/// Bosun-native annotations
pub mod bosun {
    /// Stage weight used by the weight splitter
    pub const WEIGHT: &str = "bosun.io/weight";
    /// External dependencies of a resource
    pub const EXTERNAL_DEPENDENCY: &str = "bosun.io/external-dependency";
    /// Resource policy (keep on uninstall)
    pub const RESOURCE_POLICY: &str = "bosun.io/resource-policy";
    /// Owning release name
    pub const RELEASE_NAME: &str = "bosun.io/release-name";
    /// Owning release namespace
    pub const RELEASE_NAMESPACE: &str = "bosun.io/release-namespace";
}

/// Helm-compatible annotations (for migration)
pub mod helm {
    /// Resource policy (keep on uninstall)
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
}

/// Label stamped on every resource a release applies
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "bosun";

const RESOURCE_POLICY_KEEP: &str = "keep";

/// Get annotation value, preferring Bosun over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    bosun_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(bosun_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Whether the resource must survive uninstall
pub fn has_keep_policy(annotations: &BTreeMap<String, String>) -> bool {
    [bosun::RESOURCE_POLICY, helm::RESOURCE_POLICY]
        .iter()
        .any(|key| annotations.get(*key).map(|v| v.trim()) == Some(RESOURCE_POLICY_KEEP))
}

/// Symbolic reference to a resource outside the release
///
/// Written as `[namespace:]type/name`, e.g. `deploy/postgres` or
/// `db:statefulsets.apps/postgres`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyRef {
    pub namespace: Option<String>,
    pub resource_type: String,
    pub name: String,
}

impl DependencyRef {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (namespace, rest) = match value.split_once(':') {
            Some((ns, rest)) => (Some(ns.trim().to_string()), rest),
            None => (None, value),
        };
        let (resource_type, name) = rest.split_once('/')?;
        let (resource_type, name) = (resource_type.trim(), name.trim());

        if resource_type.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        if namespace.as_deref().is_some_and(str::is_empty) {
            return None;
        }

        Some(Self {
            namespace,
            resource_type: resource_type.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}:{}/{}", ns, self.resource_type, self.name),
            None => write!(f, "{}/{}", self.resource_type, self.name),
        }
    }
}

/// Parse the external dependency annotation
///
/// Returns the valid references and the entries that could not be parsed.
pub fn parse_external_dependencies(value: &str) -> (Vec<DependencyRef>, Vec<String>) {
    let mut refs = Vec::new();
    let mut invalid = Vec::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match DependencyRef::parse(entry) {
            Some(r) => refs.push(r),
            None => invalid.push(entry.to_string()),
        }
    }

    (refs, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_annotation_prefers_bosun() {
        let annotations = make_annotations(&[
            ("bosun.io/resource-policy", "keep"),
            ("helm.sh/resource-policy", "delete"),
        ]);

        let result = get_annotation(&annotations, bosun::RESOURCE_POLICY, helm::RESOURCE_POLICY);
        assert_eq!(result, Some("keep"));
    }

    #[test]
    fn test_keep_policy_either_key() {
        assert!(has_keep_policy(&make_annotations(&[("helm.sh/resource-policy", "keep")])));
        assert!(has_keep_policy(&make_annotations(&[("bosun.io/resource-policy", "keep")])));
        assert!(!has_keep_policy(&make_annotations(&[("helm.sh/resource-policy", "delete")])));
        assert!(!has_keep_policy(&BTreeMap::new()));
    }

    #[test]
    fn test_parse_dependency_ref() {
        let r = DependencyRef::parse("deploy/postgres").unwrap();
        assert_eq!(r.namespace, None);
        assert_eq!(r.resource_type, "deploy");
        assert_eq!(r.name, "postgres");

        let r = DependencyRef::parse(" db:statefulsets.apps/postgres ").unwrap();
        assert_eq!(r.namespace.as_deref(), Some("db"));
        assert_eq!(r.resource_type, "statefulsets.apps");
        assert_eq!(r.to_string(), "db:statefulsets.apps/postgres");

        assert!(DependencyRef::parse("postgres").is_none());
        assert!(DependencyRef::parse("deploy/").is_none());
        assert!(DependencyRef::parse(":deploy/x").is_none());
        assert!(DependencyRef::parse("a/b/c").is_none());
    }

    #[test]
    fn test_parse_external_dependencies() {
        let (refs, invalid) = parse_external_dependencies("deploy/db, svc/cache,,broken");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].resource_type, "svc");
        assert_eq!(invalid, vec!["broken".to_string()]);
    }
}
