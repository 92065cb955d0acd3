//! External dependencies of a stage
//!
//! A stage may have to wait for resources that are not part of the release
//! (a database run by another team, an operator's CRs). Dependencies are
//! written symbolically as a resource type and a name, then resolved exactly
//! once into a [`ResourceInfo`] the cluster client can wait on.

use crate::error::{KubeError, Result};
use crate::mapping::TypeMapper;
use crate::resource::{ResourceInfo, ResourceList};

#[derive(Debug, Clone)]
pub struct ExternalDependency {
    /// Logical name, unique within the owning resource
    pub name: String,
    /// Type string as written by the user (`deploy`, `statefulsets.apps`)
    pub resource_type: String,
    pub resource_name: String,
    /// Applied only if the resolved type is namespaced
    pub namespace: Option<String>,
    info: Option<ResourceInfo>,
}

impl ExternalDependency {
    pub fn new(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            namespace: None,
            info: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Resolved resource, `None` until [`generate_info`](Self::generate_info) succeeded
    pub fn info(&self) -> Option<&ResourceInfo> {
        self.info.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.info.is_some()
    }

    /// Resolve the type string and build a minimal object for the dependency
    pub fn generate_info(&mut self, mapper: &dyn TypeMapper) -> Result<()> {
        if self.info.is_some() {
            return Err(KubeError::DependencyAlreadyResolved(self.name.clone()));
        }

        let mapping = mapper.resolve_type(&self.resource_type)?;
        self.info = Some(ResourceInfo::new(
            &mapping,
            &self.resource_name,
            self.namespace.clone(),
        ));

        Ok(())
    }
}

impl std::fmt::Display for ExternalDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.info {
            Some(info) => write!(f, "{} ({})", self.name, info),
            None => write!(f, "{} ({}/{})", self.name, self.resource_type, self.resource_name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExternalDependencyList(Vec<ExternalDependency>);

impl ExternalDependencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dependency: ExternalDependency) {
        self.0.push(dependency);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExternalDependency> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ExternalDependency> {
        self.0.iter_mut()
    }

    /// Resolved dependencies as resources to wait on
    pub fn as_resource_list(&self) -> ResourceList {
        self.0.iter().filter_map(|d| d.info.clone()).collect()
    }
}

impl From<Vec<ExternalDependency>> for ExternalDependencyList {
    fn from(v: Vec<ExternalDependency>) -> Self {
        Self(v)
    }
}

impl FromIterator<ExternalDependency> for ExternalDependencyList {
    fn from_iter<I: IntoIterator<Item = ExternalDependency>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ExternalDependencyList {
    type Item = &'a ExternalDependency;
    type IntoIter = std::slice::Iter<'a, ExternalDependency>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
