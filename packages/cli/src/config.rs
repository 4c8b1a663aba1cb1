// ABOUTME: Environment-driven server configuration
// ABOUTME: Parses and validates WORKBENCH_* variables with sensible defaults

use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

use workbench_sandboxes::SandboxConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub cors_origin: String,
    pub workspaces_root: PathBuf,
    pub base_image: String,
    pub max_containers_per_user: usize,
    pub container_idle_minutes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("WORKBENCH_PORT").unwrap_or_else(|_| "4000".to_string());
        let port = port_str.parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let cors_origin = env::var("WORKBENCH_CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());

        let workspaces_root = env::var("WORKBENCH_WORKSPACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/workbench-workspaces"));

        let base_image =
            env::var("WORKBENCH_BASE_IMAGE").unwrap_or_else(|_| "node:20-alpine".to_string());

        let max_containers_per_user = env::var("WORKBENCH_MAX_CONTAINERS_PER_USER")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let container_idle_minutes = env::var("WORKBENCH_CONTAINER_IDLE_MINUTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(60);

        Ok(Config {
            port,
            cors_origin,
            workspaces_root,
            base_image,
            max_containers_per_user,
            container_idle_minutes,
        })
    }

    /// Orchestrator configuration derived from the server config
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            workspaces_root: self.workspaces_root.clone(),
            base_image: self.base_image.clone(),
            max_containers_per_user: self.max_containers_per_user,
            default_idle_minutes: self.container_idle_minutes,
            ..SandboxConfig::default()
        }
    }
}
