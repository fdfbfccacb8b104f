//! Cloud platform error types

use thiserror::Error;

/// Cloud platform errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Manager not found: {0}")]
    ManagerNotFound(String),

    #[error("Found {count} manager instances for workflow tag '{tag}', expected at most one")]
    MultipleManagers { tag: String, count: usize },

    #[error("No instances found: {0}")]
    NoInstances(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
