//! Per-feature test stages and the planner trait they implement

pub mod cpu;
pub mod eager;
pub mod gpu;
pub mod omp;

use shardplan_core::{
    Config, CpuPin, Feature, Launcher, Planned, Shard, ShardError, ShardResult, StageSpec,
    System,
};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::util::EnvMap;

pub use cpu::CpuStage;
pub use eager::EagerStage;
pub use gpu::GpuStage;
pub use omp::OmpStage;

/// Computes how a feature stage divides the machine among workers
pub trait StagePlanner: Send + Sync {
    /// Feature this stage exercises
    fn kind(&self) -> Feature;

    /// Display name for the stage
    fn name(&self) -> &'static str;

    /// Stage-specific overrides to the process environment
    fn env(&self, config: &Config, system: &System) -> EnvMap;

    /// Pause the launcher should observe before starting a test on `shard`
    fn delay(&self, _shard: &Shard, _config: &Config, _system: &System) -> Duration {
        Duration::ZERO
    }

    /// Command line arguments binding a test process to `shard`
    fn shard_args(&self, shard: &Shard, config: &Config) -> Vec<String>;

    /// Compute the worker count and shards for this stage
    fn compute_spec(&self, config: &Config, system: &System) -> ShardResult<Planned>;
}

/// Planning phase of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Unplanned,
    Planned,
    Failed,
}

impl std::fmt::Display for StagePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagePhase::Unplanned => write!(f, "Unplanned"),
            StagePhase::Planned => write!(f, "Planned"),
            StagePhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug)]
enum StageState {
    Unplanned,
    Planned(Planned),
    Failed(ShardError),
}

/// A feature stage together with the outcome of planning it
pub struct Stage {
    planner: Box<dyn StagePlanner>,
    state: StageState,
}

impl Stage {
    pub fn new(planner: Box<dyn StagePlanner>) -> Self {
        Self {
            planner,
            state: StageState::Unplanned,
        }
    }

    /// Plan the stage; a stage is planned at most once
    pub fn plan(&mut self, config: &Config, system: &System) -> StagePhase {
        if matches!(self.state, StageState::Unplanned) {
            self.state = match self.planner.compute_spec(config, system) {
                Ok(planned) => {
                    for warning in &planned.warnings {
                        warn!(stage = self.planner.name(), "{}", warning);
                    }
                    info!(
                        stage = self.planner.name(),
                        workers = planned.spec.workers,
                        shards = planned.spec.shards.len(),
                        "Stage planned"
                    );
                    StageState::Planned(planned)
                }
                Err(e) => {
                    warn!(stage = self.planner.name(), error = %e, "Stage planning failed");
                    StageState::Failed(e)
                }
            };
        }
        self.phase()
    }

    pub fn phase(&self) -> StagePhase {
        match self.state {
            StageState::Unplanned => StagePhase::Unplanned,
            StageState::Planned(_) => StagePhase::Planned,
            StageState::Failed(_) => StagePhase::Failed,
        }
    }

    pub fn planner(&self) -> &dyn StagePlanner {
        self.planner.as_ref()
    }

    pub fn name(&self) -> &'static str {
        self.planner.name()
    }

    pub fn kind(&self) -> Feature {
        self.planner.kind()
    }

    pub fn planned(&self) -> Option<&Planned> {
        match &self.state {
            StageState::Planned(planned) => Some(planned),
            _ => None,
        }
    }

    pub fn spec(&self) -> Option<&StageSpec> {
        self.planned().map(|p| &p.spec)
    }

    pub fn error(&self) -> Option<&ShardError> {
        match &self.state {
            StageState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Consume the stage, yielding its planning error if it failed
    pub fn take_error(self) -> Option<ShardError> {
        match self.state {
            StageState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Banner shown when the stage starts running
    pub fn intro(&self) -> Option<String> {
        let workers = self.spec()?.workers;
        let plural = if workers > 1 { "s" } else { "" };
        Some(format!(
            "Entering stage: {} (with {} worker{})",
            self.name(),
            workers,
            plural
        ))
    }

    /// Full environment for a test process of this stage
    pub fn process_env(&self, config: &Config, system: &System) -> EnvMap {
        merge_env(
            config.env(),
            self.planner.env(config, system),
            std::env::var("LEGATE_CONFIG").ok(),
        )
    }
}

/// Overlay stage overrides on the base environment, keeping a user-set
/// `LEGATE_CONFIG` since it changes the test invocation directly
pub(crate) fn merge_env(
    mut base: EnvMap,
    stage: EnvMap,
    legate_config: Option<String>,
) -> EnvMap {
    base.extend(stage);
    if let Some(value) = legate_config {
        base.insert("LEGATE_CONFIG".to_string(), value);
    }
    base
}

/// Launcher arguments shared by every stage
pub fn multi_node_args(config: &Config) -> Vec<String> {
    let mn = &config.multi_node;
    let mut args = Vec::new();

    if mn.launcher != Launcher::None {
        args.push("--launcher".to_string());
        args.push(mn.launcher.to_string());
    }

    if mn.ranks_per_node > 1 {
        args.push("--ranks-per-node".to_string());
        args.push(mn.ranks_per_node.to_string());
    }

    if mn.launcher == Launcher::Mpirun {
        // only gtest runs need this, but python runs tolerate it
        args.push("--launcher-extra=--merge-stderr-to-stdout".to_string());

        if let Some(filename) = mn.mpi_output_filename.as_deref() {
            args.push("--launcher-extra=\"--output-filename\"".to_string());
            args.push(format!("--launcher-extra={}", shell_quote(filename)));
        }
    }

    if mn.nodes > 1 {
        args.push("--nodes".to_string());
        args.push(mn.nodes.to_string());
    }

    for extra in &mn.launcher_extra {
        args.push(format!("--launcher-extra={}", extra));
    }

    args
}

/// `--cpu-bind` arguments unless pinning is disabled
pub fn cpu_pin_args(config: &Config, shard: &Shard) -> Vec<String> {
    if config.execution.cpu_pin == CpuPin::None {
        Vec::new()
    } else {
        vec!["--cpu-bind".to_string(), shard.to_string()]
    }
}

/// Quote a word for a POSIX shell, leaving plain words untouched
pub(crate) fn shell_quote(word: &str) -> String {
    let plain = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);
    if !word.is_empty() && word.chars().all(plain) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', "'\"'\"'"))
}

pub(crate) fn too_large(what: &str) -> ShardError {
    ShardError::Config(format!("requested {} is too large to plan", what))
}

/// Ranks per node, which must be at least one
pub(crate) fn ranks_per_node(config: &Config) -> ShardResult<u32> {
    match config.multi_node.ranks_per_node {
        0 => Err(ShardError::Config(
            "ranks per node must be at least 1".to_string(),
        )),
        ranks => Ok(ranks),
    }
}

/// Resources one worker reserves across all of its ranks
pub(crate) fn per_worker(per_rank: u32, config: &Config, what: &str) -> ShardResult<u32> {
    per_rank
        .checked_mul(ranks_per_node(config)?)
        .ok_or_else(|| too_large(what))
}

/// Cores each rank reserves, plus one for the pinning helper when strict
pub(crate) fn procs_per_rank(requested: u32, config: &Config) -> ShardResult<u32> {
    let procs = requested
        .checked_add(u32::from(config.execution.cpu_pin.is_strict()))
        .ok_or_else(|| too_large("core count"))?;
    if procs == 0 {
        return Err(ShardError::Config(
            "each rank must reserve at least one core".to_string(),
        ));
    }
    Ok(procs)
}

/// Message used when the core count cannot fit even one worker
pub(crate) fn not_enough_cores(system: &System, config: &Config, procs: u32) -> String {
    let mut msg = format!(
        "{} detected core(s) not enough for {} rank(s) per node, each reserving {} core(s)",
        system.cpus.len(),
        config.multi_node.ranks_per_node,
        procs
    );
    if config.execution.cpu_pin.is_strict() {
        msg.push_str(" with strict CPU pinning");
    } else {
        msg.push_str(", running anyway.");
    }
    msg
}

/// Single oversubscribed worker spanning every core
pub(crate) fn oversubscribed(system: &System, warning: String) -> Planned {
    let spec = StageSpec::new(1, vec![Shard::single(system.all_core_ids())]);
    Planned::with_warning(spec, warning)
}

/// Contiguous blocks of `procs` CPU groups per rank, worker-major
pub(crate) fn core_shards(
    system: &System,
    workers: u32,
    ranks_per_node: u32,
    procs: u32,
) -> Vec<Shard> {
    (0..workers)
        .map(|i| {
            let ranks = (0..ranks_per_node)
                .map(|j| {
                    let start = ((j + i * ranks_per_node) * procs) as usize;
                    let end = start + procs as usize;
                    let mut ids: Vec<u32> = system
                        .cpus
                        .get(start..end)
                        .unwrap_or_default()
                        .iter()
                        .flat_map(|cpu| cpu.ids.iter().copied())
                        .collect();
                    ids.sort_unstable();
                    ids
                })
                .collect();
            let shard = Shard::new(ranks);
            debug!(worker = i, shard = %shard, "Assigned cores");
            shard
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::fake_system;
    use super::*;
    use shardplan_core::MultiNodeConfig;

    fn multi_rank_config(launcher: Launcher) -> Config {
        let mut config = Config::default();
        config.multi_node = MultiNodeConfig {
            ranks_per_node: 2,
            launcher,
            ..MultiNodeConfig::default()
        };
        config
    }

    #[test]
    fn test_multi_node_args_local() {
        assert!(multi_node_args(&Config::default()).is_empty());
    }

    #[test]
    fn test_multi_node_args_srun() {
        let config = multi_rank_config(Launcher::Srun);
        assert_eq!(
            multi_node_args(&config),
            vec!["--launcher", "srun", "--ranks-per-node", "2"]
        );
    }

    #[test]
    fn test_multi_node_args_mpirun() {
        let mut config = multi_rank_config(Launcher::Mpirun);
        config.multi_node.nodes = 2;
        config.multi_node.mpi_output_filename = Some("/tmp/mpi_result".to_string());
        config.multi_node.launcher_extra = vec!["-x FOO".to_string()];
        assert_eq!(
            multi_node_args(&config),
            vec![
                "--launcher",
                "mpirun",
                "--ranks-per-node",
                "2",
                "--launcher-extra=--merge-stderr-to-stdout",
                "--launcher-extra=\"--output-filename\"",
                "--launcher-extra=/tmp/mpi_result",
                "--nodes",
                "2",
                "--launcher-extra=-x FOO",
            ]
        );
    }

    #[test]
    fn test_mpirun_output_filename_quoted() {
        let mut config = multi_rank_config(Launcher::Mpirun);
        config.multi_node.mpi_output_filename = Some("/tmp/mpi out".to_string());
        let args = multi_node_args(&config);
        assert!(args.contains(&"--launcher-extra='/tmp/mpi out'".to_string()));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/mpi_result"), "/tmp/mpi_result");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn test_per_worker_guards() {
        let mut config = multi_rank_config(Launcher::Srun);
        assert_eq!(per_worker(3, &config, "cores").unwrap(), 6);
        assert!(per_worker(u32::MAX, &config, "cores").unwrap_err().is_config());

        config.multi_node.ranks_per_node = 0;
        assert!(ranks_per_node(&config).unwrap_err().is_config());
        assert!(per_worker(1, &config, "cores").unwrap_err().is_config());
    }

    #[test]
    fn test_procs_per_rank_overflow() {
        let mut config = Config::default();
        config.execution.cpu_pin = CpuPin::Strict;
        assert_eq!(procs_per_rank(2, &config).unwrap(), 3);
        assert!(procs_per_rank(u32::MAX, &config).unwrap_err().is_config());
    }

    #[test]
    fn test_cpu_pin_args() {
        let mut config = Config::default();
        let shard = Shard::new(vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(cpu_pin_args(&config, &shard), vec!["--cpu-bind", "0,1/2,3"]);

        config.execution.cpu_pin = CpuPin::None;
        assert!(cpu_pin_args(&config, &shard).is_empty());
    }

    #[test]
    fn test_merge_env() {
        let base = crate::util::env_map(&[("A", "1"), ("B", "1")]);
        let stage = crate::util::env_map(&[("B", "2")]);
        let env = merge_env(base, stage, Some("--cpus 1".to_string()));
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "2");
        assert_eq!(env["LEGATE_CONFIG"], "--cpus 1");
    }

    #[test]
    fn test_core_shards_multi_core_groups() {
        let system = System::new(
            vec![
                shardplan_core::Cpu { id: 0, ids: vec![1, 0] },
                shardplan_core::Cpu { id: 1, ids: vec![3, 2] },
            ],
            Vec::new(),
            1024,
        );
        let shards = core_shards(&system, 2, 1, 1);
        assert_eq!(
            shards,
            vec![Shard::single(vec![0, 1]), Shard::single(vec![2, 3])]
        );
    }

    struct FixedStage;

    impl StagePlanner for FixedStage {
        fn kind(&self) -> Feature {
            Feature::Eager
        }

        fn name(&self) -> &'static str {
            "mock"
        }

        fn env(&self, _config: &Config, _system: &System) -> EnvMap {
            EnvMap::new()
        }

        fn shard_args(&self, _shard: &Shard, _config: &Config) -> Vec<String> {
            Vec::new()
        }

        fn compute_spec(&self, _config: &Config, _system: &System) -> ShardResult<Planned> {
            let shards = vec![
                Shard::single(vec![0]),
                Shard::single(vec![1]),
                Shard::single(vec![2]),
            ];
            Ok(Planned::new(StageSpec::new(2, shards)))
        }
    }

    #[test]
    fn test_stage_lifecycle() {
        let config = Config::default();
        let system = fake_system(4, 0);
        let mut stage = Stage::new(Box::new(FixedStage));
        assert_eq!(stage.phase(), StagePhase::Unplanned);
        assert!(stage.intro().is_none());

        assert_eq!(stage.plan(&config, &system), StagePhase::Planned);
        assert_eq!(stage.spec().unwrap().workers, 2);
        assert_eq!(
            stage.intro().unwrap(),
            "Entering stage: mock (with 2 workers)"
        );
        assert_eq!(
            stage.planner().delay(&Shard::single(vec![0]), &config, &system),
            Duration::ZERO
        );
    }

    #[test]
    fn test_stage_failure() {
        let mut config = Config::default();
        config.core.cpus = 16;
        config.execution.cpu_pin = CpuPin::Strict;
        let system = fake_system(12, 0);
        let mut stage = Stage::new(Box::new(CpuStage));

        assert_eq!(stage.plan(&config, &system), StagePhase::Failed);
        assert!(stage.spec().is_none());
        assert!(matches!(
            stage.error(),
            Some(ShardError::ResourceExhausted(_))
        ));
        assert_eq!(stage.phase().to_string(), "Failed");
    }
}
