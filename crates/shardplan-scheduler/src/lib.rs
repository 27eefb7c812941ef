//! shardplan-scheduler: Resource-sharding planners for parallel test runs
//!
//! This crate turns a hardware inventory and a run configuration into
//! per-stage worker counts and resource shards:
//! - Worker-count resolution against user requests
//! - CPU, GPU, OpenMP and eager stage planners
//! - Feature registry and whole-run test plan

pub mod plan;
pub mod registry;
pub mod stages;
pub mod util;

pub use plan::TestPlan;
pub use registry::{planner_by_name, planner_for};
pub use stages::{Stage, StagePhase, StagePlanner};
pub use util::{adjust_workers, EnvMap};
