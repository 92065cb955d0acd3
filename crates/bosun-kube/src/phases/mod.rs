//! Staged rollout engine
//!
//! A [`RolloutPhase`] splits a release into stages, a
//! [`DeployedResourcesCalculator`] works out what earlier revisions left on
//! the cluster, and the [`RolloutPhaseManager`] applies the stages one by one
//! through a [`StageHandler`], persisting the checkpoint after each.

mod calculator;
mod generator;
mod manager;
mod rollout;
mod splitter;

pub use calculator::DeployedResourcesCalculator;
pub use generator::{
    AnnotationExternalDepsGenerator, ExternalDepsGenerator, NoExternalDepsGenerator,
};
pub use manager::{RolloutPhaseManager, StageHandler};
pub use rollout::RolloutPhase;
pub use splitter::{SingleStageSplitter, Splitter, WeightAnnotationSplitter, splitter_for};
