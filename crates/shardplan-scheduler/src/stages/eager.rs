//! Eager test stage: no accelerators, one core per test

use shardplan_core::defaults::{MAX_EAGER_WORKERS, SMALL_SYSMEM};
use shardplan_core::{Config, Feature, Planned, Shard, ShardResult, StageSpec, System};

use super::{cpu_pin_args, multi_node_args, ranks_per_node, StagePlanner};
use crate::util::{adjust_workers, env_map, EnvMap, EAGER_ENV, UNPIN_ENV};

/// A test stage for exercising eager (non-deferred) execution
pub struct EagerStage;

impl StagePlanner for EagerStage {
    fn kind(&self) -> Feature {
        Feature::Eager
    }

    fn name(&self) -> &'static str {
        "Eager"
    }

    fn env(&self, _config: &Config, _system: &System) -> EnvMap {
        let mut env = env_map(UNPIN_ENV);
        env.extend(env_map(EAGER_ENV));
        env
    }

    fn shard_args(&self, shard: &Shard, config: &Config) -> Vec<String> {
        let mut args = vec!["--cpus".to_string(), "1".to_string()];
        args.extend(cpu_pin_args(config, shard));
        args.push("--sysmem".to_string());
        args.push(SMALL_SYSMEM.to_string());
        args.extend(multi_node_args(config));
        args
    }

    fn compute_spec(&self, config: &Config, system: &System) -> ShardResult<Planned> {
        ranks_per_node(config)?;
        let degree = (system.cpus.len() as u32).min(MAX_EAGER_WORKERS);

        let detail = format!("cpus={}", system.cpus.len());
        let workers = adjust_workers(degree, config.requested_workers(), Some(&detail))?;

        // each worker gets one whole CPU group
        let shards = system
            .cpus
            .iter()
            .take(workers as usize)
            .map(|cpu| {
                let mut ids = cpu.ids.clone();
                ids.sort_unstable();
                Shard::single(ids)
            })
            .collect();

        Ok(Planned::new(StageSpec::new(workers, shards)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::fake_system;
    use shardplan_core::{CpuPin, ShardError};

    #[test]
    fn test_default() {
        let config = Config::default();
        let system = fake_system(4, 0);
        let stage = EagerStage;
        assert_eq!(stage.kind(), Feature::Eager);

        let env = stage.env(&config, &system);
        assert_eq!(env["CUNUMERIC_FORCE_THUNK"], "eager");
        assert!(env.contains_key("REALM_SYNTHETIC_CORE_MAP"));

        let planned = stage.compute_spec(&config, &system).unwrap();
        assert_eq!(planned.spec.workers, 4);
        assert_eq!(
            planned.spec.shards,
            (0..4).map(|i| Shard::single(vec![i])).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_workers_capped() {
        let planned = EagerStage
            .compute_spec(&Config::default(), &fake_system(128, 0))
            .unwrap();
        assert_eq!(planned.spec.workers, MAX_EAGER_WORKERS);
        assert_eq!(planned.spec.shards.len(), MAX_EAGER_WORKERS as usize);
    }

    #[test]
    fn test_requested_workers() {
        let mut config = Config::default();
        config.execution.workers = Some(2);
        let planned = EagerStage.compute_spec(&config, &fake_system(4, 0)).unwrap();
        assert_eq!(planned.spec.workers, 2);
        assert_eq!(planned.spec.shards.len(), 2);
    }

    #[test]
    fn test_no_cpus() {
        let err = EagerStage
            .compute_spec(&Config::default(), &fake_system(0, 0))
            .unwrap_err();
        assert!(matches!(err, ShardError::ResourceExhausted(_)));
    }

    #[test]
    fn test_zero_ranks_per_node() {
        let mut config = Config::default();
        config.multi_node.ranks_per_node = 0;
        let err = EagerStage.compute_spec(&config, &fake_system(4, 0)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_shard_args() {
        let mut config = Config::default();
        let shard = Shard::single(vec![3]);
        assert_eq!(
            EagerStage.shard_args(&shard, &config),
            vec!["--cpus", "1", "--cpu-bind", "3", "--sysmem", "300"]
        );

        config.execution.cpu_pin = CpuPin::None;
        assert_eq!(
            EagerStage.shard_args(&shard, &config),
            vec!["--cpus", "1", "--sysmem", "300"]
        );
    }
}
