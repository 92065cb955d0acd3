//! Stages of a rollout and their weight-ordered list

use crate::cluster::OperationResult;
use crate::externaldeps::ExternalDependencyList;
use crate::resource::ResourceList;

/// A group of resources applied together
#[derive(Debug, Clone, Default)]
pub struct Stage {
    pub weight: i32,
    pub desired_resources: ResourceList,
    pub external_dependencies: ExternalDependencyList,
    /// Set by the apply step of the current run
    pub result: Option<OperationResult>,
}

impl Stage {
    pub fn new(weight: i32, desired_resources: ResourceList) -> Self {
        Self {
            weight,
            desired_resources,
            ..Default::default()
        }
    }
}

/// Stages in ascending weight order
///
/// Sorting is stable; stages with equal weight keep their relative order.
/// Weights need not be contiguous.
#[derive(Debug, Clone, Default)]
pub struct SortedStageList(Vec<Stage>);

impl SortedStageList {
    pub fn new(mut stages: Vec<Stage>) -> Self {
        stages.sort_by_key(|s| s.weight);
        Self(stages)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stage> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Stage> {
        self.0.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Stage> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Stage> {
        self.0.get_mut(index)
    }

    /// Index of the last stage, `None` without stages
    pub fn last_index(&self) -> Option<usize> {
        self.0.len().checked_sub(1)
    }

    pub fn stage_by_weight(&self, weight: i32) -> Option<&Stage> {
        self.0.iter().find(|s| s.weight == weight)
    }

    pub fn stage_by_weight_mut(&mut self, weight: i32) -> Option<&mut Stage> {
        self.0.iter_mut().find(|s| s.weight == weight)
    }

    /// Stages `first..=last`, with `last` clamped to the final index
    fn range(&self, first: usize, last: usize) -> &[Stage] {
        match self.last_index() {
            Some(final_index) if first <= last.min(final_index) => {
                &self.0[first..=last.min(final_index)]
            }
            _ => &[],
        }
    }

    fn merge_results(
        &self,
        first: usize,
        last: usize,
        select: impl Fn(&OperationResult) -> &ResourceList,
    ) -> ResourceList {
        let mut merged = ResourceList::new();
        for result in self.range(first, last).iter().filter_map(|s| s.result.as_ref()) {
            merged.merge(select(result).clone());
        }
        merged
    }

    pub fn merged_created_resources(&self) -> ResourceList {
        self.merged_created_resources_in_range(0, usize::MAX)
    }

    pub fn merged_created_resources_in_range(&self, first: usize, last: usize) -> ResourceList {
        self.merge_results(first, last, |r| &r.created)
    }

    pub fn merged_updated_resources(&self) -> ResourceList {
        self.merged_updated_resources_in_range(0, usize::MAX)
    }

    pub fn merged_updated_resources_in_range(&self, first: usize, last: usize) -> ResourceList {
        self.merge_results(first, last, |r| &r.updated)
    }

    pub fn merged_deleted_resources(&self) -> ResourceList {
        self.merged_deleted_resources_in_range(0, usize::MAX)
    }

    pub fn merged_deleted_resources_in_range(&self, first: usize, last: usize) -> ResourceList {
        self.merge_results(first, last, |r| &r.deleted)
    }

    pub fn merged_desired_resources(&self) -> ResourceList {
        self.merged_desired_resources_in_range(0, usize::MAX)
    }

    pub fn merged_desired_resources_in_range(&self, first: usize, last: usize) -> ResourceList {
        let mut merged = ResourceList::new();
        for stage in self.range(first, last) {
            merged.merge(stage.desired_resources.clone());
        }
        merged
    }

    /// One line per stage: weight, desired resources and dependency count
    pub fn summary(&self) -> String {
        self.0
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "stage {} (weight {}): {} [{} external]",
                    i,
                    s.weight,
                    s.desired_resources.names().join(", "),
                    s.external_dependencies.len()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<'a> IntoIterator for &'a SortedStageList {
    type Item = &'a Stage;
    type IntoIter = std::slice::Iter<'a, Stage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{cm, list};

    fn stages() -> SortedStageList {
        SortedStageList::new(vec![
            Stage::new(10, list(vec![cm("c")])),
            Stage::new(-5, list(vec![cm("a")])),
            Stage::new(0, list(vec![cm("b1")])),
            Stage::new(0, list(vec![cm("b2")])),
        ])
    }

    #[test]
    fn test_sorted_stable_by_weight() {
        let weights: Vec<i32> = stages().iter().map(|s| s.weight).collect();
        assert_eq!(weights, vec![-5, 0, 0, 10]);

        let s = stages();
        assert_eq!(s.get(1).unwrap().desired_resources.names(), vec!["default:ConfigMap/b1"]);
        assert_eq!(s.get(2).unwrap().desired_resources.names(), vec!["default:ConfigMap/b2"]);
    }

    #[test]
    fn test_stage_by_weight() {
        let s = stages();
        assert_eq!(s.stage_by_weight(10).unwrap().desired_resources.len(), 1);
        assert!(s.stage_by_weight(3).is_none());
        assert_eq!(s.last_index(), Some(3));
        assert_eq!(SortedStageList::default().last_index(), None);
    }

    #[test]
    fn test_merged_desired_in_range() {
        let s = stages();
        assert_eq!(
            s.merged_desired_resources_in_range(0, 1).names(),
            vec!["default:ConfigMap/a", "default:ConfigMap/b1"]
        );
        assert_eq!(s.merged_desired_resources_in_range(2, 99).len(), 2);
        assert!(s.merged_desired_resources_in_range(3, 1).is_empty());
        assert!(SortedStageList::default().merged_desired_resources().is_empty());
    }

    #[test]
    fn test_merged_results_skip_unapplied_stages() {
        let mut s = stages();
        s.get_mut(0).unwrap().result = Some(OperationResult {
            created: list(vec![cm("a")]),
            ..Default::default()
        });
        s.get_mut(3).unwrap().result = Some(OperationResult {
            created: list(vec![cm("c")]),
            updated: list(vec![cm("x")]),
            ..Default::default()
        });

        assert_eq!(s.merged_created_resources().len(), 2);
        assert_eq!(s.merged_created_resources_in_range(1, 2).len(), 0);
        assert_eq!(s.merged_updated_resources().names(), vec!["default:ConfigMap/x"]);
        assert!(s.merged_deleted_resources().is_empty());
    }

    #[test]
    fn test_summary() {
        insta::assert_snapshot!(stages().summary(), @r"
        stage 0 (weight -5): default:ConfigMap/a [0 external]
        stage 1 (weight 0): default:ConfigMap/b1 [0 external]
        stage 2 (weight 0): default:ConfigMap/b2 [0 external]
        stage 3 (weight 10): default:ConfigMap/c [0 external]
        ");
    }
}
