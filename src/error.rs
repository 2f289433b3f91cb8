//! Error types for cluster-ferry
//!
//! The hierarchy mirrors the layers of the pipeline:
//! - Validation errors for malformed task names, definitions and parameters
//! - Store errors from the shared key-value store (Redis)
//! - Cluster errors from the source/destination document stores
//! - Transfer errors raised while executing a subtask
//! - Configuration errors from the CLI and plugin files

use thiserror::Error;

/// Top-level error type for cluster-ferry
#[derive(Error, Debug)]
pub enum FerryError {
    /// Malformed identifiers or parameters, never retried
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Shared key-value store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Source or destination cluster errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Subtask execution errors
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FerryError {
    fn from(err: serde_json::Error) -> Self {
        FerryError::Serialization(err.to_string())
    }
}

/// Validation failures surfaced straight to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Task name does not match the naming rule
    #[error("Invalid task name '{name}': must be 1-40 alphanumeric characters starting with a letter")]
    InvalidTaskName { name: String },

    /// Task definition is unusable
    #[error("Invalid task '{name}': {reason}")]
    InvalidTask { name: String, reason: String },

    /// Subtask payload could not be interpreted
    #[error("Invalid subtask: {0}")]
    InvalidSubtask(String),

    /// A parameter is out of range or malformed
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Task is not registered
    #[error("Task '{name}' not found")]
    TaskNotFound { name: String },

    /// Task is already registered
    #[error("Task '{name}' already exists")]
    TaskExists { name: String },
}

/// Shared key-value store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis connection failed
    #[error("Failed to connect to Redis at '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(String),

    /// An entry exists but cannot be decoded
    #[error("Corrupt entry in '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

/// Source/destination cluster errors
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    /// Request never produced a response
    #[error("Request to '{host}' failed: {reason}")]
    Transport { host: String, reason: String },

    /// Cluster answered with an error status
    #[error("'{host}' returned HTTP {status}: {body}")]
    Status {
        host: String,
        status: u16,
        body: String,
    },

    /// Response did not have the expected shape
    #[error("Malformed response from '{host}': {reason}")]
    Malformed { host: String, reason: String },

    /// Index, template or scroll cursor does not exist
    #[error("{what} not found on '{host}'")]
    NotFound { host: String, what: String },
}

impl ClusterError {
    /// Check if this error is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Transport { .. } => true,
            ClusterError::Status { status, .. } => *status >= 500 || *status == 429,
            ClusterError::Malformed { .. } | ClusterError::NotFound { .. } => false,
        }
    }
}

/// Errors raised while executing one subtask
#[derive(Error, Debug)]
pub enum TransferError {
    /// At least one bulk item failed for a reason other than admission control
    #[error("{count} bulk item(s) failed: {}", .failures.join("; "))]
    UnrecoverableBulk { count: usize, failures: Vec<String> },

    /// Destination kept rejecting the same flush
    #[error("exceeded max flush retries ({attempts}) with {rejected} item(s) still rejected")]
    ExceededFlushRetries { attempts: u32, rejected: usize },

    /// Referenced plugin namespace is not registered
    #[error("Unknown plugin namespace '{0}'")]
    UnknownPlugin(String),

    /// Source configuration vanished between generation and transfer
    #[error("{kind} '{name}' not found on source")]
    MissingSource { kind: &'static str, name: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Duration or interval is out of range
    #[error("Invalid interval '{name}': {reason}")]
    InvalidInterval { name: String, reason: String },

    /// Backoff bounds are inverted
    #[error("Invalid backoff range: {min_ms}ms > {max_ms}ms")]
    InvalidBackoff { min_ms: u64, max_ms: u64 },

    /// Plugin file could not be interpreted
    #[error("Invalid plugin definition '{id}': {reason}")]
    InvalidPlugin { id: String, reason: String },

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FerryError>;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
