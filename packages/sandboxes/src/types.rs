// ABOUTME: Core type definitions for workspace containers
// ABOUTME: Records, resource limits, port bindings, and command execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Container lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created
    Starting,
    /// Container is running
    Running,
    /// Container has stopped
    Stopped,
    /// Container encountered an error
    Error,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Error => "error",
        }
    }
}

/// Resource limits applied to a workspace container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in megabytes
    pub memory_mb: u64,
    /// CPU cores (can be fractional, e.g., 0.5 for half a core)
    pub cpu_cores: f64,
    /// Disk ceiling in gigabytes
    pub disk_gb: u64,
    /// Idle minutes before the container is stopped automatically
    pub timeout_minutes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 1.0,
            disk_gb: 2,
            timeout_minutes: 60,
        }
    }
}

/// One host-to-container port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port the dev server listens on inside the container
    pub internal: u16,
    /// Host port allocated for preview traffic
    pub external: u16,
}

/// Registry entry describing one running workspace container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container ID assigned by the runtime
    pub container_id: String,
    /// Workspace this container belongs to
    pub workspace_id: String,
    /// Owning user
    pub user_id: String,
    /// Current lifecycle status
    pub status: ContainerStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Active port bindings (exactly one in the current design)
    pub ports: Vec<PortBinding>,
    /// Last observed memory usage in megabytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<u64>,
    /// Last observed CPU usage percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage_percent: Option<f64>,
}

impl ContainerRecord {
    /// External port bound to the container's dev-server port, if any
    pub fn external_port(&self, internal: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.internal == internal)
            .map(|p| p.external)
    }
}

/// One file in a workspace seed manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root
    pub file_path: String,
    /// File contents
    pub content: String,
}

/// Live resource usage sample for a running container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Memory used in megabytes
    pub memory_used_mb: u64,
    /// CPU usage percentage (can exceed 100 for multi-core)
    pub cpu_usage_percent: f64,
}

/// Options for a single command execution
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Wall-clock budget; defaults to five minutes
    pub timeout: Option<Duration>,
    /// Working directory inside the container; defaults to /workspace
    pub cwd: Option<String>,
}

/// Structured result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecResult {
    /// Failure result used when the runtime itself errors out
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: 1,
        }
    }
}
