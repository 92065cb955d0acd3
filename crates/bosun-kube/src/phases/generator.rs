//! External dependency generators
//!
//! A generator attaches external dependencies to stages before anything is
//! applied. Problems that do not block the rollout are reported through the
//! [`Diagnostics`] handed in by the caller.

use bosun_core::Diagnostics;

use crate::annotations::{self, parse_external_dependencies};
use crate::error::Result;
use crate::externaldeps::ExternalDependency;
use crate::mapping::TypeMapper;
use crate::stages::SortedStageList;

pub trait ExternalDepsGenerator: Send + Sync {
    /// Attach and resolve external dependencies of every stage
    fn generate(
        &self,
        stages: &mut SortedStageList,
        release_namespace: &str,
        mapper: &dyn TypeMapper,
        diagnostics: &mut Diagnostics,
    ) -> Result<()>;
}

/// Generator that adds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalDepsGenerator;

impl ExternalDepsGenerator for NoExternalDepsGenerator {
    fn generate(
        &self,
        _stages: &mut SortedStageList,
        _release_namespace: &str,
        _mapper: &dyn TypeMapper,
        _diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        Ok(())
    }
}

/// Reads `bosun.io/external-dependency` from each desired resource
///
/// The annotation holds comma-separated `[namespace:]type/name` entries.
/// Without an explicit namespace the declaring resource's namespace is used,
/// or the release namespace for cluster-scoped declarers. Unparsable entries
/// are skipped with a warning; unknown types are fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationExternalDepsGenerator;

impl ExternalDepsGenerator for AnnotationExternalDepsGenerator {
    fn generate(
        &self,
        stages: &mut SortedStageList,
        release_namespace: &str,
        mapper: &dyn TypeMapper,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        for stage in stages.iter_mut() {
            let mut generated = Vec::new();

            for info in stage.desired_resources.iter() {
                let Some(value) = info.annotation(annotations::bosun::EXTERNAL_DEPENDENCY) else {
                    continue;
                };

                let (refs, invalid) = parse_external_dependencies(value);
                for entry in invalid {
                    diagnostics.warn(format!(
                        "ignoring invalid external dependency '{}' of {}",
                        entry, info
                    ));
                }

                for dep_ref in refs {
                    let namespace = dep_ref
                        .namespace
                        .clone()
                        .or_else(|| info.namespace.clone())
                        .unwrap_or_else(|| release_namespace.to_string());

                    let mut dependency = ExternalDependency::new(
                        format!("{}->{}", info, dep_ref),
                        &dep_ref.resource_type,
                        &dep_ref.name,
                    )
                    .with_namespace(namespace);
                    dependency.generate_info(mapper)?;
                    generated.push(dependency);
                }
            }

            for dependency in generated {
                let duplicate = stage.external_dependencies.iter().any(|existing| {
                    match (existing.info(), dependency.info()) {
                        (Some(a), Some(b)) => a.is_same(b),
                        _ => false,
                    }
                });
                if duplicate {
                    diagnostics.info(format!("external dependency {} declared twice", dependency));
                } else {
                    stage.external_dependencies.push(dependency);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use crate::mapping::StaticTypeMapper;
    use crate::resource::testing::{cm, info, list};
    use crate::resource::ResourceInfo;
    use crate::stages::Stage;

    fn declaring(mut res: ResourceInfo, value: &str) -> ResourceInfo {
        res.object
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                annotations::bosun::EXTERNAL_DEPENDENCY.to_string(),
                value.to_string(),
            );
        res
    }

    fn stages(resources: Vec<ResourceInfo>) -> SortedStageList {
        SortedStageList::new(vec![Stage::new(0, list(resources))])
    }

    #[test]
    fn test_noop_generator() {
        let mut s = stages(vec![declaring(cm("a"), "deploy/db")]);
        let mut diagnostics = Diagnostics::new();
        NoExternalDepsGenerator
            .generate(&mut s, "default", &StaticTypeMapper::new(), &mut diagnostics)
            .unwrap();
        assert!(s.get(0).unwrap().external_dependencies.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_annotation_generator_resolves_namespaces() {
        let mut s = stages(vec![
            declaring(info("deploy", "web", Some("apps")), "sts/db, infra:svc/cache"),
            declaring(info("clusterrole", "reader", None), "deploy/operator,ns/infra"),
        ]);
        let mut diagnostics = Diagnostics::new();
        AnnotationExternalDepsGenerator
            .generate(&mut s, "release-ns", &StaticTypeMapper::new(), &mut diagnostics)
            .unwrap();

        let deps = s.get(0).unwrap().external_dependencies.as_resource_list();
        assert_eq!(
            deps.names(),
            vec![
                "apps:StatefulSet/db",
                "infra:Service/cache",
                "release-ns:Deployment/operator",
                "Namespace/infra",
            ]
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_annotation_generator_warns_and_dedupes() {
        let mut s = stages(vec![
            declaring(cm("a"), "deploy/db,not-a-ref"),
            declaring(cm("b"), "deployment/db"),
        ]);
        let mut diagnostics = Diagnostics::new();
        AnnotationExternalDepsGenerator
            .generate(&mut s, "default", &StaticTypeMapper::new(), &mut diagnostics)
            .unwrap();

        assert_eq!(s.get(0).unwrap().external_dependencies.len(), 1);
        assert_eq!(diagnostics.warnings().count(), 1);
        assert_eq!(diagnostics.entries().len(), 2);
    }

    #[test]
    fn test_annotation_generator_unknown_type_is_fatal() {
        let mut s = stages(vec![declaring(cm("a"), "widgets/x")]);
        let err = AnnotationExternalDepsGenerator
            .generate(&mut s, "default", &StaticTypeMapper::new(), &mut Diagnostics::new())
            .unwrap_err();
        assert!(matches!(err, KubeError::UnknownResourceType(_)));
    }
}
