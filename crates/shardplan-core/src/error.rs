//! Error types for shardplan

use thiserror::Error;

/// Main error type for shardplan
#[derive(Error, Debug)]
pub enum ShardError {
    /// Invalid configuration, including bad worker requests
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not enough hardware to run even a single worker
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Hardware inventory could not be read
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// Requested feature has no planner
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShardError {
    /// Whether this error came from the user's configuration rather than
    /// the hardware
    pub fn is_config(&self) -> bool {
        matches!(self, ShardError::Config(_) | ShardError::UnknownFeature(_))
    }
}

/// Result type for shardplan operations
pub type ShardResult<T> = Result<T, ShardError>;

impl From<serde_json::Error> for ShardError {
    fn from(err: serde_json::Error) -> Self {
        ShardError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ShardError {
    fn from(err: toml::de::Error) -> Self {
        ShardError::Config(err.to_string())
    }
}
