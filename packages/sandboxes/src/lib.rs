// ABOUTME: Sandboxed workspace container orchestration for Workbench
// ABOUTME: Container lifecycle, command gating, port allocation, and idle cleanup

pub mod error;
pub mod gate;
pub mod manager;
pub mod runtime;
pub mod types;
pub mod workspace;

// Re-export commonly used types
pub use error::{Result, SandboxError};
pub use manager::{ContainerManager, SandboxConfig};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};
pub use types::{
    ContainerRecord, ContainerStatus, ExecOptions, ExecResult, PortBinding, ResourceLimits,
    ResourceUsage, WorkspaceFile,
};
