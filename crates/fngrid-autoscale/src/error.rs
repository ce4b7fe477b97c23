//! Error types for the autoscaler.

use thiserror::Error;

use crate::function::FunctionId;

/// Result type alias for autoscaler operations.
pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Errors returned by the autoscaler's lifecycle methods.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AutoscaleError {
    #[error("already monitoring topic {topic} and function {function}")]
    AlreadyMonitoring { topic: String, function: FunctionId },

    #[error("not monitoring topic {topic} and function {function}")]
    NotMonitoring { topic: String, function: FunctionId },

    #[error("autoscaler has already been started")]
    AlreadyStarted,

    #[error("autoscaler is not running")]
    NotRunning,

    #[error("no tokio runtime to run the accumulation task on")]
    NoRuntime,

    #[error("accumulation task failed: {0}")]
    TaskFailed(String),
}

/// Errors loading or interpreting a scaling configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration {value:?} for {field}")]
    InvalidDuration { field: String, value: String },

    #[error("{field} must allow at least one replica")]
    InvalidReplicas { field: String },
}
