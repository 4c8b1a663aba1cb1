// ABOUTME: Container runtime abstraction and its Docker implementation
// ABOUTME: Wraps bollard behind a trait so the registry logic stays runtime-agnostic

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
    network::{CreateNetworkOptions, InspectNetworkOptions},
    Docker,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SandboxError};
use crate::types::{ExecResult, ResourceUsage};

/// Labels applied to all Workbench containers for tracking
pub const MANAGED_LABEL: &str = "workbench.managed";
pub const WORKSPACE_LABEL: &str = "workbench.workspace_id";
pub const USER_LABEL: &str = "workbench.user_id";

/// Docker network joined by all workspace containers
const NETWORK_NAME: &str = "workbench-net";

/// Cap on captured stdout/stderr per command execution (10 MB)
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Everything the runtime needs to start one workspace container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name (workbench-{workspace_id})
    pub name: String,
    /// Base image, e.g. "node:20-alpine"
    pub image: String,
    /// Workspace id recorded as a label
    pub workspace_id: String,
    /// Owning user recorded as a label
    pub user_id: String,
    /// Host directory bind-mounted read-write at /workspace
    pub workspace_path: String,
    /// Allocated host port
    pub host_port: u16,
    /// Dev-server port inside the container
    pub internal_port: u16,
    /// Environment variables (already validated by the manager)
    pub env: Vec<String>,
    /// Memory ceiling in megabytes
    pub memory_mb: u64,
    /// CPU cores
    pub cpu_cores: f64,
    /// Disk ceiling in gigabytes
    pub disk_gb: u64,
}

/// Runtime interface for workspace containers.
///
/// Any backend exposing create/exec/stats/stop/remove/list primitives can be
/// substituted; production uses the Docker API via bollard.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container, returning the runtime-assigned id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Run a shell command inside a running container
    async fn exec(&self, container_id: &str, command: &str, workdir: &str) -> Result<ExecResult>;

    /// One-shot resource usage sample
    async fn stats(&self, container_id: &str) -> Result<ResourceUsage>;

    /// Stop a container with a grace period
    async fn stop(&self, container_id: &str, timeout_secs: i64) -> Result<()>;

    /// Remove a container and its anonymous volumes
    async fn remove(&self, container_id: &str, force: bool) -> Result<()>;

    /// Container ids carrying the managed label, including stopped ones
    async fn list_managed(&self) -> Result<Vec<String>>;
}

/// Docker-backed runtime
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon and verify it responds
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_defaults()?;

        docker.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            SandboxError::Docker(e)
        })?;

        info!("Connected to Docker daemon");

        let runtime = Self { docker };
        runtime.ensure_network().await?;
        Ok(runtime)
    }

    /// Create the shared container network if it does not exist yet
    async fn ensure_network(&self) -> Result<()> {
        match self
            .docker
            .inspect_network(NETWORK_NAME, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(()),
            Err(_) => {
                self.docker
                    .create_network(CreateNetworkOptions {
                        name: NETWORK_NAME.to_string(),
                        check_duplicate: true,
                        ..Default::default()
                    })
                    .await?;
                info!("Created network: {}", NETWORK_NAME);
                Ok(())
            }
        }
    }

    fn labels(spec: &ContainerSpec) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(WORKSPACE_LABEL.to_string(), spec.workspace_id.clone());
        labels.insert(USER_LABEL.to_string(), spec.user_id.clone());
        labels
    }

    /// Build the container configuration with the restrictive security profile:
    /// all capabilities dropped except file-ownership changes, no privilege
    /// escalation, read-only rootfs with noexec tmpfs scratch areas, and the
    /// workspace as the only writable mount.
    fn to_config(spec: &ContainerSpec) -> Config<String> {
        let container_port = format!("{}/tcp", spec.internal_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let tmpfs = HashMap::from([
            ("/tmp".to_string(), "rw,noexec,nosuid,size=100m".to_string()),
            (
                "/home/node/.npm".to_string(),
                "rw,noexec,nosuid,size=100m".to_string(),
            ),
        ]);

        let host_config = HostConfig {
            memory: Some((spec.memory_mb * 1024 * 1024) as i64),
            cpu_quota: Some((spec.cpu_cores * 100_000.0) as i64),
            cpu_period: Some(100_000),
            storage_opt: Some(HashMap::from([(
                "size".to_string(),
                format!("{}G", spec.disk_gb),
            )])),
            network_mode: Some(NETWORK_NAME.to_string()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: Some(0),
            }),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add: Some(vec![
                "CHOWN".to_string(),
                "SETGID".to_string(),
                "SETUID".to_string(),
            ]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            privileged: Some(false),
            readonly_rootfs: Some(true),
            tmpfs: Some(tmpfs),
            binds: Some(vec![format!("{}:/workspace:rw", spec.workspace_path)]),
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            user: Some("node".to_string()),
            working_dir: Some("/workspace".to_string()),
            // Keep the container alive; commands arrive over exec
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            labels: Some(Self::labels(spec)),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            tty: Some(false),
            ..Default::default()
        }
    }

    /// Parse a Docker stats sample into a resource usage snapshot
    fn parse_stats(stats: &Stats) -> ResourceUsage {
        let memory_used_mb = stats.memory_stats.usage.unwrap_or(0) / 1024 / 1024;

        let cpu_stats = &stats.cpu_stats;
        let precpu_stats = &stats.precpu_stats;

        let cpu_delta =
            cpu_stats.cpu_usage.total_usage as f64 - precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - precpu_stats.system_cpu_usage.unwrap_or(0) as f64;

        let cpu_usage_percent = if system_delta > 0.0 {
            let num_cpus = cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len())
                .unwrap_or(1) as f64;
            (cpu_delta / system_delta) * num_cpus * 100.0
        } else {
            0.0
        };

        ResourceUsage {
            memory_used_mb,
            cpu_usage_percent,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        debug!(
            "Creating container {} with image {}",
            spec.name, spec.image
        );

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), Self::to_config(spec))
            .await?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(
            "Started container {} for workspace {}",
            response.id, spec.workspace_id
        );
        Ok(response.id)
    }

    async fn exec(&self, container_id: &str, command: &str, workdir: &str) -> Result<ExecResult> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ]),
            working_dir: Some(workdir.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, exec_config).await?;
        let start_result = self.docker.start_exec(&exec.id, None).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            if stdout.len() < MAX_OUTPUT_BYTES {
                                stdout.extend_from_slice(&message);
                            }
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            if stderr.len() < MAX_OUTPUT_BYTES {
                                stderr.extend_from_slice(&message);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Error reading exec output: {}", e);
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Ok(ExecResult::failure("Exec was detached unexpectedly"));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    async fn stats(&self, container_id: &str) -> Result<ResourceUsage> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stats_stream = self.docker.stats(container_id, Some(options));
        match stats_stream.next().await {
            Some(Ok(stats)) => Ok(Self::parse_stats(&stats)),
            Some(Err(e)) => Err(SandboxError::Docker(e)),
            None => Err(SandboxError::ContainerNotRunning(container_id.to_string())),
        }
    }

    async fn stop(&self, container_id: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };

        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            // Already stopped is not an error
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} already stopped", container_id);
                Ok(())
            }
            Err(e) => Err(SandboxError::Docker(e)),
        }
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => Ok(()),
            // Already removed is not an error
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(SandboxError::Docker(e)),
        }
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
