//! Hardware inventory: CPU groups, GPUs and system memory

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{ShardError, ShardResult};

/// A group of logical cores that is scheduled as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    /// Group identifier
    pub id: u32,
    /// Logical core ids bound to this group
    pub ids: Vec<u32>,
}

impl Cpu {
    /// A group holding a single logical core
    pub fn single(id: u32) -> Self {
        Self { id, ids: vec![id] }
    }
}

/// A GPU device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gpu {
    /// Device id
    pub id: u32,
    /// Total framebuffer memory in bytes
    pub total: u64,
}

/// Detected machine description used by every planner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct System {
    /// CPU groups, in detection order
    pub cpus: Vec<Cpu>,
    /// GPU devices, in detection order
    pub gpus: Vec<Gpu>,
    /// Total system memory in MB
    pub memory: u64,
}

impl System {
    /// Build an inventory from its parts
    pub fn new(cpus: Vec<Cpu>, gpus: Vec<Gpu>, memory: u64) -> Self {
        Self { cpus, gpus, memory }
    }

    /// Probe the current machine
    ///
    /// Every logical core becomes its own CPU group. GPUs are not probed;
    /// supply them through an inventory file on accelerator hosts.
    pub fn detect() -> Self {
        let cores = num_cpus::get() as u32;
        let cpus = (0..cores).map(Cpu::single).collect();

        Self {
            cpus,
            gpus: detect_gpus(),
            memory: detect_memory_mb(),
        }
    }

    /// Load an inventory from a TOML file
    pub fn from_file(path: &Path) -> ShardResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShardError::Inventory(format!("Failed to read inventory file: {}", e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse an inventory from TOML text
    pub fn from_toml_str(content: &str) -> ShardResult<Self> {
        toml::from_str(content)
            .map_err(|e| ShardError::Inventory(format!("Failed to parse inventory: {}", e)))
    }

    /// All logical core ids across every group, sorted ascending
    pub fn all_core_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.cpus.iter().flat_map(|c| c.ids.iter().copied()).collect();
        ids.sort_unstable();
        ids
    }

    /// Smallest framebuffer among the detected GPUs, in MB
    pub fn min_gpu_memory_mb(&self) -> Option<f64> {
        self.gpus
            .iter()
            .map(|g| g.total)
            .min()
            .map(|bytes| bytes as f64 / (1u64 << 20) as f64)
    }
}

/// Total physical memory in MB
fn detect_memory_mb() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.total_memory() / (1 << 20)
}

/// Detect GPUs on the system
fn detect_gpus() -> Vec<Gpu> {
    // NVML probing would go here
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let system = System::detect();
        assert!(!system.cpus.is_empty());
        assert!(system.memory > 0);
    }

    #[test]
    fn test_inventory_parse() {
        let toml_str = r#"
memory = 65536

[[cpus]]
id = 0
ids = [0, 1]

[[cpus]]
id = 1
ids = [2, 3]

[[gpus]]
id = 0
total = 17179869184

[[gpus]]
id = 1
total = 8589934592
"#;
        let system = System::from_toml_str(toml_str).unwrap();
        assert_eq!(system.cpus.len(), 2);
        assert_eq!(system.cpus[1].ids, vec![2, 3]);
        assert_eq!(system.gpus.len(), 2);
        assert_eq!(system.memory, 65536);
        assert_eq!(system.min_gpu_memory_mb(), Some(8192.0));
    }

    #[test]
    fn test_inventory_parse_error() {
        let result = System::from_toml_str("memory = \"lots\"");
        assert!(matches!(result, Err(ShardError::Inventory(_))));
    }

    #[test]
    fn test_all_core_ids_sorted() {
        let system = System::new(
            vec![
                Cpu { id: 0, ids: vec![4, 0] },
                Cpu { id: 1, ids: vec![3, 1] },
            ],
            Vec::new(),
            1024,
        );
        assert_eq!(system.all_core_ids(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_no_gpus() {
        let system = System::default();
        assert_eq!(system.min_gpu_memory_mb(), None);
    }
}
