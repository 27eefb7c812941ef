//! Configuration types for shardplan

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::defaults;
use crate::{ShardError, ShardResult};

/// Test run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feature stages to plan, in order
    pub features: Vec<Feature>,
    /// Per-process core allocation
    pub core: CoreConfig,
    /// Per-process memory budgets
    pub memory: MemoryConfig,
    /// Multi-rank and launcher settings
    pub multi_node: MultiNodeConfig,
    /// Worker count, pinning and oversubscription policy
    pub execution: ExecutionConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> ShardResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShardError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> ShardResult<Self> {
        toml::from_str(content)
            .map_err(|e| ShardError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the cross-field constraints planners rely on
    pub fn validate(&self) -> ShardResult<()> {
        let mn = &self.multi_node;

        if mn.ranks_per_node == 0 {
            return Err(ShardError::Config(
                "ranks per node must be at least 1".to_string(),
            ));
        }

        if mn.nodes == 0 {
            return Err(ShardError::Config("nodes must be at least 1".to_string()));
        }

        if mn.nodes > 1 && mn.launcher == Launcher::None {
            return Err(ShardError::Config(format!(
                "Requested multi-node configuration with --nodes {} but did not \
                 specify a launcher. Must use --launcher to specify a launcher.",
                mn.nodes
            )));
        }

        if mn.ranks_per_node > 1 && mn.launcher == Launcher::None {
            return Err(ShardError::Config(format!(
                "Requested multi-rank configuration with --ranks-per-node {} but did \
                 not specify a launcher. Must use --launcher to specify a launcher.",
                mn.ranks_per_node
            )));
        }

        let bloat = self.execution.bloat_factor;
        if bloat.is_nan() || bloat < 1.0 {
            return Err(ShardError::Config(format!(
                "bloat factor must be at least 1.0, got {}",
                bloat
            )));
        }

        Ok(())
    }

    /// Features to plan, falling back to the CPU stage when none are set
    pub fn features(&self) -> Vec<Feature> {
        if self.features.is_empty() {
            vec![Feature::Cpus]
        } else {
            self.features.clone()
        }
    }

    /// Environment applied to every test process before stage overrides
    pub fn env(&self) -> BTreeMap<String, String> {
        defaults::PROCESS_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Explicit worker count requested by the user, if any
    pub fn requested_workers(&self) -> Option<i64> {
        self.execution.workers
    }
}

/// Per-process core allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cpus: u32,
    pub gpus: u32,
    pub omps: u32,
    pub ompthreads: u32,
    pub utility: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cpus: defaults::CPUS_PER_NODE,
            gpus: defaults::GPUS_PER_NODE,
            omps: defaults::OMPS_PER_NODE,
            ompthreads: defaults::OMPTHREADS,
            utility: defaults::UTILITY,
        }
    }
}

/// Per-process memory budgets, all in MB
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub sysmem: u64,
    pub fbmem: u64,
    pub numamem: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sysmem: defaults::SYS_MEMORY_BUDGET,
            fbmem: defaults::GPU_MEMORY_BUDGET,
            numamem: defaults::NUMA_MEMORY_BUDGET,
        }
    }
}

/// Multi-node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiNodeConfig {
    pub nodes: u32,
    pub ranks_per_node: u32,
    pub launcher: Launcher,
    /// Extra arguments forwarded verbatim to the launcher
    pub launcher_extra: Vec<String>,
    /// Where mpirun should write per-rank output
    pub mpi_output_filename: Option<String>,
}

impl Default for MultiNodeConfig {
    fn default() -> Self {
        Self {
            nodes: defaults::NODES,
            ranks_per_node: defaults::RANKS_PER_NODE,
            launcher: Launcher::None,
            launcher_extra: Vec::new(),
            mpi_output_filename: None,
        }
    }
}

/// Test execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Requested number of parallel workers
    pub workers: Option<i64>,
    /// Per-test timeout in seconds
    pub timeout: Option<u64>,
    /// Headroom multiplier for memory reservations
    pub bloat_factor: f64,
    /// Delay between GPU test launches (ms)
    pub gpu_delay: u64,
    pub cpu_pin: CpuPin,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout: None,
            bloat_factor: defaults::BLOAT_FACTOR,
            gpu_delay: defaults::GPU_DELAY,
            cpu_pin: CpuPin::Partial,
        }
    }
}

/// CPU pinning behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuPin {
    /// Bind to the shard's cores, letting the runtime place its threads
    #[default]
    Partial,
    /// Do not bind at all
    None,
    /// Bind exclusively, reserving an extra core for the pinning helper
    Strict,
}

impl CpuPin {
    pub fn is_strict(self) -> bool {
        self == CpuPin::Strict
    }
}

impl std::fmt::Display for CpuPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuPin::Partial => write!(f, "partial"),
            CpuPin::None => write!(f, "none"),
            CpuPin::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for CpuPin {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(CpuPin::Partial),
            "none" => Ok(CpuPin::None),
            "strict" => Ok(CpuPin::Strict),
            other => Err(ShardError::Config(format!(
                "invalid cpu pin mode '{}' (expected partial, none or strict)",
                other
            ))),
        }
    }
}

/// Multi-rank launcher program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Launcher {
    Mpirun,
    Jsrun,
    Srun,
    /// Local run, or the launch already happened
    #[default]
    None,
}

impl std::fmt::Display for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Launcher::Mpirun => write!(f, "mpirun"),
            Launcher::Jsrun => write!(f, "jsrun"),
            Launcher::Srun => write!(f, "srun"),
            Launcher::None => write!(f, "none"),
        }
    }
}

impl FromStr for Launcher {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpirun" => Ok(Launcher::Mpirun),
            "jsrun" => Ok(Launcher::Jsrun),
            "srun" => Ok(Launcher::Srun),
            "none" => Ok(Launcher::None),
            other => Err(ShardError::Config(format!("invalid launcher '{}'", other))),
        }
    }
}

/// Test feature a stage exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// CPU-only execution
    Cpus,
    /// GPU execution
    Cuda,
    /// OpenMP execution
    Openmp,
    /// No hardware acceleration, one core per test
    Eager,
}

impl Feature {
    pub const ALL: [Feature; 4] = [Feature::Cpus, Feature::Cuda, Feature::Openmp, Feature::Eager];
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::Cpus => write!(f, "cpus"),
            Feature::Cuda => write!(f, "cuda"),
            Feature::Openmp => write!(f, "openmp"),
            Feature::Eager => write!(f, "eager"),
        }
    }
}

impl FromStr for Feature {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpus" => Ok(Feature::Cpus),
            "cuda" => Ok(Feature::Cuda),
            "openmp" => Ok(Feature::Openmp),
            "eager" => Ok(Feature::Eager),
            other => Err(ShardError::UnknownFeature(other.to_string())),
        }
    }
}
