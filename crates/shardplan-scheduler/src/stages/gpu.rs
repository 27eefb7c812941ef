//! GPU test stage
//!
//! GPUs are split into disjoint groups, one per test, and each group is
//! additionally time-shared by as many tests as fit in its framebuffer.

use shardplan_core::defaults::SMALL_SYSMEM;
use shardplan_core::{Config, Feature, Planned, Shard, ShardError, ShardResult, StageSpec, System};
use std::time::Duration;
use tracing::{debug, warn};

use super::{multi_node_args, per_worker, ranks_per_node, StagePlanner};
use crate::util::{adjust_workers, env_map, EnvMap, MANUAL_CONFIG_ENV};

/// A test stage for exercising GPU features
pub struct GpuStage {
    /// Device ids, indexed by position in the inventory
    gpu_ids: Vec<u32>,
}

impl GpuStage {
    pub fn new(system: &System) -> Self {
        Self {
            gpu_ids: system.gpus.iter().map(|g| g.id).collect(),
        }
    }

    /// Device id for an inventory index; unknown indices pass through unchanged
    fn device_id(&self, index: u32) -> u32 {
        match self.gpu_ids.get(index as usize) {
            Some(&id) => id,
            None => {
                warn!(
                    index = index,
                    gpus = self.gpu_ids.len(),
                    "GPU index outside the planned inventory, binding it as a device id"
                );
                index
            }
        }
    }
}

impl StagePlanner for GpuStage {
    fn kind(&self) -> Feature {
        Feature::Cuda
    }

    fn name(&self) -> &'static str {
        "GPU"
    }

    fn env(&self, _config: &Config, _system: &System) -> EnvMap {
        env_map(MANUAL_CONFIG_ENV)
    }

    fn delay(&self, _shard: &Shard, config: &Config, _system: &System) -> Duration {
        Duration::from_millis(config.execution.gpu_delay)
    }

    fn shard_args(&self, shard: &Shard, config: &Config) -> Vec<String> {
        let gpu_ids = shard.map_ids(|index| self.device_id(index));

        let mut args = vec![
            "--fbmem".to_string(),
            config.memory.fbmem.to_string(),
            "--gpus".to_string(),
            shard.per_rank().to_string(),
            "--gpu-bind".to_string(),
            gpu_ids.to_string(),
            "--sysmem".to_string(),
            SMALL_SYSMEM.to_string(),
            "--cpus".to_string(),
            "1".to_string(),
            "--utility".to_string(),
            config.core.utility.to_string(),
        ];
        args.extend(multi_node_args(config));
        args
    }

    fn compute_spec(&self, config: &Config, system: &System) -> ShardResult<Planned> {
        let gpus = config.core.gpus;
        let ranks_per_node = ranks_per_node(config)?;
        let fbmem = config.memory.fbmem;
        let bloat_factor = config.execution.bloat_factor;

        if gpus == 0 {
            return Err(ShardError::Config(
                "GPU stage requires at least one GPU per test".to_string(),
            ));
        }
        if fbmem == 0 {
            return Err(ShardError::Config(
                "GPU stage requires a non-zero framebuffer budget".to_string(),
            ));
        }

        let fbsize = system.min_gpu_memory_mb().ok_or_else(|| {
            ShardError::ResourceExhausted("No GPUs detected for the GPU stage".to_string())
        })?;

        let degree = system.gpus.len() as u32 / per_worker(gpus, config, "GPU count")?;

        let oversub_factor = (fbsize / (fbmem as f64 * bloat_factor)).floor() as u32;

        let gpu_workers = degree.saturating_mul(oversub_factor);

        let mem_workers = (system.memory as f64 / (SMALL_SYSMEM as f64 * bloat_factor)).floor() as u32;

        let workers = gpu_workers.min(mem_workers);

        let detail = format!(
            "fbsize={} oversub_factor={} gpu_workers={} mem_workers={}",
            fbsize, oversub_factor, gpu_workers, mem_workers
        );
        let workers = adjust_workers(workers, config.requested_workers(), Some(&detail))?;

        debug!(
            degree = degree,
            oversub_factor = oversub_factor,
            workers = workers,
            "Computed GPU sharding"
        );

        let base: Vec<Shard> = (0..degree)
            .map(|i| {
                let ranks = (0..ranks_per_node)
                    .map(|j| {
                        let start = (j + i * ranks_per_node) * gpus;
                        (start..start + gpus).collect()
                    })
                    .collect();
                Shard::new(ranks)
            })
            .collect();

        let shard_factor = if ranks_per_node == 1 {
            workers
        } else {
            oversub_factor
        };

        let shards = base
            .iter()
            .cloned()
            .cycle()
            .take(base.len() * shard_factor as usize)
            .collect();

        Ok(Planned::new(StageSpec::new(workers, shards)))
    }
}
