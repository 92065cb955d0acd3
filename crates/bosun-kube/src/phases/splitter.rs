//! Splitting a release's resources into stages

use std::collections::BTreeMap;
use std::sync::Arc;

use bosun_core::SplitterKind;

use crate::annotations;
use crate::error::{KubeError, Result};
use crate::resource::ResourceList;
use crate::stages::{SortedStageList, Stage};

/// Partition of resources into weighted stages
///
/// Every input resource lands in exactly one stage.
pub trait Splitter: Send + Sync {
    fn split(&self, resources: ResourceList) -> Result<SortedStageList>;
}

/// Everything in one stage of weight 0
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleStageSplitter;

impl Splitter for SingleStageSplitter {
    fn split(&self, resources: ResourceList) -> Result<SortedStageList> {
        Ok(SortedStageList::new(vec![Stage::new(0, resources)]))
    }
}

/// One stage per distinct `bosun.io/weight` value
///
/// Resources without the annotation get weight 0. Input order is kept inside
/// each stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightAnnotationSplitter;

impl Splitter for WeightAnnotationSplitter {
    fn split(&self, resources: ResourceList) -> Result<SortedStageList> {
        let mut by_weight: BTreeMap<i32, ResourceList> = BTreeMap::new();

        for info in resources {
            let weight = match info.annotation(annotations::bosun::WEIGHT) {
                None => 0,
                Some(value) => value.trim().parse::<i32>().map_err(|_| {
                    KubeError::InvalidAnnotation {
                        resource: info.to_string(),
                        annotation: annotations::bosun::WEIGHT.to_string(),
                        value: value.to_string(),
                    }
                })?,
            };
            by_weight.entry(weight).or_default().push(info);
        }

        Ok(SortedStageList::new(
            by_weight
                .into_iter()
                .map(|(weight, resources)| Stage::new(weight, resources))
                .collect(),
        ))
    }
}

/// Splitter selected in [`bosun_core::Settings`]
pub fn splitter_for(kind: SplitterKind) -> Arc<dyn Splitter> {
    match kind {
        SplitterKind::Single => Arc::new(SingleStageSplitter),
        SplitterKind::Weight => Arc::new(WeightAnnotationSplitter),
    }
}
