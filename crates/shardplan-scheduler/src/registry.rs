//! Maps requested features to their stage planners

use shardplan_core::{Feature, ShardResult, System};

use crate::stages::{CpuStage, EagerStage, GpuStage, OmpStage, StagePlanner};

/// Planner for a feature
pub fn planner_for(feature: Feature, system: &System) -> Box<dyn StagePlanner> {
    match feature {
        Feature::Cpus => Box::new(CpuStage),
        Feature::Cuda => Box::new(GpuStage::new(system)),
        Feature::Openmp => Box::new(OmpStage),
        Feature::Eager => Box::new(EagerStage),
    }
}

/// Planner for a feature given by name, e.g. `"cuda"`
pub fn planner_by_name(name: &str, system: &System) -> ShardResult<Box<dyn StagePlanner>> {
    let feature: Feature = name.parse()?;
    Ok(planner_for(feature, system))
}
