//! Shard and stage specification types

use serde::{Deserialize, Serialize};

/// Resource ids (core ids or GPU indices) assigned to one rank
pub type RankShard = Vec<u32>;

/// How resources are allotted to one test process, one entry per rank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    pub ranks: Vec<RankShard>,
}

impl Shard {
    /// Create a shard from per-rank id lists
    pub fn new(ranks: Vec<RankShard>) -> Self {
        Self { ranks }
    }

    /// A shard with a single rank
    pub fn single(ids: RankShard) -> Self {
        Self { ranks: vec![ids] }
    }

    /// Total number of ids across all ranks
    pub fn len(&self) -> usize {
        self.ranks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids assigned to each rank, averaged over ranks
    pub fn per_rank(&self) -> usize {
        if self.ranks.is_empty() {
            0
        } else {
            self.len() / self.ranks.len()
        }
    }

    /// Map every id through `f`, keeping the rank layout
    pub fn map_ids(&self, f: impl Fn(u32) -> u32) -> Shard {
        Shard {
            ranks: self
                .ranks
                .iter()
                .map(|rank| rank.iter().map(|&id| f(id)).collect())
                .collect(),
        }
    }
}

impl std::fmt::Display for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ranks: Vec<String> = self
            .ranks
            .iter()
            .map(|rank| {
                rank.iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        write!(f, "{}", ranks.join("/"))
    }
}

/// The computed operation of one test stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Number of worker processes to run concurrently
    pub workers: u32,
    /// Shards drawn on by workers, in launch order
    pub shards: Vec<Shard>,
}

impl StageSpec {
    pub fn new(workers: u32, shards: Vec<Shard>) -> Self {
        Self { workers, shards }
    }
}

/// A successful planning result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Planned {
    pub spec: StageSpec,
    /// Non-fatal diagnostics, e.g. an oversubscribed fallback
    pub warnings: Vec<String>,
}

impl Planned {
    pub fn new(spec: StageSpec) -> Self {
        Self {
            spec,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(spec: StageSpec, warning: String) -> Self {
        Self {
            spec,
            warnings: vec![warning],
        }
    }
}
