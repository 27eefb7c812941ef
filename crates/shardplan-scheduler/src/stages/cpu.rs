//! CPU-only test stage

use shardplan_core::{Config, Feature, Planned, Shard, ShardError, ShardResult, StageSpec, System};

use super::{core_shards, cpu_pin_args, multi_node_args, not_enough_cores, oversubscribed};
use super::{per_worker, procs_per_rank, ranks_per_node, too_large, StagePlanner};
use crate::util::{adjust_workers, env_map, EnvMap, UNPIN_ENV};

/// A test stage for exercising CPU features
pub struct CpuStage;

impl StagePlanner for CpuStage {
    fn kind(&self) -> Feature {
        Feature::Cpus
    }

    fn name(&self) -> &'static str {
        "CPU"
    }

    fn env(&self, config: &Config, _system: &System) -> EnvMap {
        if config.execution.cpu_pin.is_strict() {
            EnvMap::new()
        } else {
            env_map(UNPIN_ENV)
        }
    }

    fn shard_args(&self, shard: &Shard, config: &Config) -> Vec<String> {
        let mut args = vec![
            "--cpus".to_string(),
            config.core.cpus.to_string(),
            "--sysmem".to_string(),
            config.memory.sysmem.to_string(),
        ];
        args.extend(cpu_pin_args(config, shard));
        args.extend(multi_node_args(config));
        args
    }

    fn compute_spec(&self, config: &Config, system: &System) -> ShardResult<Planned> {
        let ranks_per_node = ranks_per_node(config)?;
        let requested = config
            .core
            .cpus
            .checked_add(config.core.utility)
            .ok_or_else(|| too_large("core count"))?;
        let procs = procs_per_rank(requested, config)?;

        let workers = system.cpus.len() as u32 / per_worker(procs, config, "core count")?;

        if workers == 0 {
            let msg = not_enough_cores(system, config, procs);
            if config.execution.cpu_pin.is_strict() {
                return Err(ShardError::ResourceExhausted(msg));
            }
            return Ok(oversubscribed(system, msg));
        }

        let workers = adjust_workers(workers, config.requested_workers(), None)?;
        let shards = core_shards(system, workers, ranks_per_node, procs);

        Ok(Planned::new(StageSpec::new(workers, shards)))
    }
}
