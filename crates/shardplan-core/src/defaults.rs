//! Default values for the run configuration and fixed planner constants

/// CPUs per test process
pub const CPUS_PER_NODE: u32 = 2;

/// GPUs per test process
pub const GPUS_PER_NODE: u32 = 1;

/// OpenMP processors per test process
pub const OMPS_PER_NODE: u32 = 1;

/// Threads per OpenMP processor
pub const OMPTHREADS: u32 = 4;

/// Utility cores reserved for runtime services
pub const UTILITY: u32 = 1;

/// Per-process system memory budget (MB)
pub const SYS_MEMORY_BUDGET: u64 = 4000;

/// Per-process framebuffer memory budget (MB)
pub const GPU_MEMORY_BUDGET: u64 = 4096;

/// Per-process NUMA memory budget for OpenMP processors (MB)
pub const NUMA_MEMORY_BUDGET: u64 = 4000;

/// Host memory reserved by stages whose tests mostly live elsewhere (MB)
pub const SMALL_SYSMEM: u64 = 300;

/// Delay between GPU test launches (ms)
pub const GPU_DELAY: u64 = 2000;

/// Headroom multiplier applied to memory reservations
pub const BLOAT_FACTOR: f64 = 1.5;

pub const NODES: u32 = 1;

pub const RANKS_PER_NODE: u32 = 1;

/// Upper bound on eager-stage workers
pub const MAX_EAGER_WORKERS: u32 = 60;

/// Environment applied to every test process
pub const PROCESS_ENV: &[(&str, &str)] = &[
    ("LEGATE_TEST", "1"),
    ("PYTHONDONTWRITEBYTECODE", "1"),
];
