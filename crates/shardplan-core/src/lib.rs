//! shardplan-core: Core types for the shardplan test-run planner
//!
//! This crate provides the fundamental types shared by every planner:
//! - Run configuration and its defaults
//! - Hardware inventory (CPU groups, GPUs, system memory)
//! - Shard and stage specification model
//! - Error handling

pub mod config;
pub mod defaults;
pub mod error;
pub mod shard;
pub mod system;

pub use config::*;
pub use error::*;
pub use shard::*;
pub use system::*;
