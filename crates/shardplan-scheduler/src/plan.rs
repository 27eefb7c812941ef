//! Test plan covering every requested feature stage

use shardplan_core::{Config, ShardError, ShardResult, System};
use tracing::{info, warn};

use crate::registry::planner_for;
use crate::stages::{Stage, StagePhase};

/// All feature stages of one test run, each planned once
pub struct TestPlan {
    stages: Vec<Stage>,
}

impl TestPlan {
    /// Validate the configuration and plan every requested stage
    ///
    /// A stage that cannot be planned is kept as failed so the others can
    /// still run. Only when every stage fails is the run itself an error,
    /// reported with the last failure.
    pub fn new(config: &Config, system: &System) -> ShardResult<Self> {
        config.validate()?;

        let features = config.features();

        info!(
            features = ?features,
            cpus = system.cpus.len(),
            gpus = system.gpus.len(),
            memory_mb = system.memory,
            "Planning test run"
        );

        let mut stages: Vec<Stage> = features
            .iter()
            .map(|&feature| Stage::new(planner_for(feature, system)))
            .collect();

        for stage in &mut stages {
            stage.plan(config, system);
        }

        if stages.iter().all(|s| s.phase() == StagePhase::Failed) {
            let last = stages.pop().and_then(Stage::take_error);
            return Err(last.unwrap_or_else(|| {
                ShardError::ResourceExhausted("no stages were requested".to_string())
            }));
        }

        let failed = stages
            .iter()
            .filter(|s| s.phase() == StagePhase::Failed)
            .count();
        if failed > 0 {
            warn!(failed = failed, "Some stages could not be planned and will be skipped");
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stages that were planned successfully
    pub fn planned(&self) -> impl Iterator<Item = &Stage> {
        self.stages
            .iter()
            .filter(|s| s.phase() == StagePhase::Planned)
    }

    /// Stages whose planning failed
    pub fn failed(&self) -> impl Iterator<Item = &Stage> {
        self.stages
            .iter()
            .filter(|s| s.phase() == StagePhase::Failed)
    }

    /// Summary shown before the run starts
    pub fn intro(&self, system: &System) -> String {
        let features: Vec<String> = self.stages.iter().map(|s| s.kind().to_string()).collect();
        format!(
            "Test Suite Configuration\n\
             * Feature stages       : {}\n\
             * System description   : {} cpus / {} gpus / {} MB",
            features.join(", "),
            system.cpus.len(),
            system.gpus.len(),
            system.memory
        )
    }
}
