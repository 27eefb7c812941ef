//! OpenMP test stage

use shardplan_core::defaults::SMALL_SYSMEM;
use shardplan_core::{Config, Feature, Planned, Shard, ShardError, ShardResult, StageSpec, System};
use tracing::debug;

use super::{core_shards, cpu_pin_args, multi_node_args, not_enough_cores, oversubscribed};
use super::{per_worker, procs_per_rank, ranks_per_node, too_large, StagePlanner};
use crate::util::{adjust_workers, env_map, EnvMap, MANUAL_CONFIG_ENV, UNPIN_ENV};

/// A test stage for exercising OpenMP features
pub struct OmpStage;

impl StagePlanner for OmpStage {
    fn kind(&self) -> Feature {
        Feature::Openmp
    }

    fn name(&self) -> &'static str {
        "OMP"
    }

    fn env(&self, config: &Config, _system: &System) -> EnvMap {
        let mut env = env_map(MANUAL_CONFIG_ENV);
        if !config.execution.cpu_pin.is_strict() {
            env.extend(env_map(UNPIN_ENV));
        }
        env
    }

    fn shard_args(&self, shard: &Shard, config: &Config) -> Vec<String> {
        let mut args = vec![
            "--omps".to_string(),
            config.core.omps.to_string(),
            "--ompthreads".to_string(),
            config.core.ompthreads.to_string(),
            "--numamem".to_string(),
            config.memory.numamem.to_string(),
            "--sysmem".to_string(),
            SMALL_SYSMEM.to_string(),
            "--cpus".to_string(),
            "1".to_string(),
            "--utility".to_string(),
            config.core.utility.to_string(),
        ];
        args.extend(cpu_pin_args(config, shard));
        args.extend(multi_node_args(config));
        args
    }

    fn compute_spec(&self, config: &Config, system: &System) -> ShardResult<Planned> {
        let omps = config.core.omps;
        let ranks_per_node = ranks_per_node(config)?;
        let bloat_factor = config.execution.bloat_factor;

        let requested = omps
            .checked_mul(config.core.ompthreads)
            .and_then(|threads| threads.checked_add(config.core.utility))
            .ok_or_else(|| too_large("OpenMP thread count"))?;
        let procs = procs_per_rank(requested, config)?;

        let omp_workers = system.cpus.len() as u32 / per_worker(procs, config, "thread count")?;

        let numamem = u64::from(omps)
            .checked_mul(config.memory.numamem)
            .and_then(|mem| mem.checked_add(SMALL_SYSMEM))
            .ok_or_else(|| too_large("NUMA memory"))?;
        let mem_per_test = numamem as f64 * bloat_factor;

        let mem_workers = (system.memory as f64 / mem_per_test).floor() as u32;

        if omp_workers == 0 {
            let msg = not_enough_cores(system, config, procs);
            if config.execution.cpu_pin.is_strict() {
                return Err(ShardError::ResourceExhausted(msg));
            }
            if mem_workers > 0 {
                return Ok(oversubscribed(system, msg));
            }
        }

        let workers = omp_workers.min(mem_workers);

        let detail = format!("omp_workers={} mem_workers={}", omp_workers, mem_workers);
        let workers = adjust_workers(workers, config.requested_workers(), Some(&detail))?;

        debug!(
            procs_per_rank = procs,
            omp_workers = omp_workers,
            mem_workers = mem_workers,
            workers = workers,
            "Computed OpenMP sharding"
        );

        let shards = core_shards(system, workers, ranks_per_node, procs);

        Ok(Planned::new(StageSpec::new(workers, shards)))
    }
}
