// ABOUTME: Error types for workspace container orchestration
// ABOUTME: Covers Docker failures, quota enforcement, and command gating

use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Docker/container-related errors
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// No running container for the workspace
    #[error("Container not found or not running: {0}")]
    ContainerNotRunning(String),

    /// Per-user concurrent container ceiling reached
    #[error("Maximum {limit} containers per user exceeded")]
    QuotaExceeded { limit: usize },

    /// Container creation failed; detailed cause is logged, not surfaced
    #[error("Failed to create isolated environment")]
    ProvisioningFailed,

    /// A concurrent creation for the same workspace is still in flight
    #[error("Workspace is already being provisioned: {0}")]
    ProvisioningInProgress(String),

    /// Command rejected by the deny-list/allow-list gate
    #[error("Command not allowed: {0}")]
    CommandRejected(String),

    /// Command execution exceeded its wall-clock budget
    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Workspace file manifest contained an unusable path
    #[error("Invalid workspace file path: {0}")]
    InvalidFilePath(String),

    /// Invalid environment variable supplied by the caller
    #[error("Invalid environment variable: {0}")]
    InvalidEnvVar(String),

    /// I/O error while materializing the workspace directory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
