// ABOUTME: Workspace container registry and lifecycle orchestration
// ABOUTME: Capacity enforcement, port allocation, command execution, idle cleanup

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SandboxError};
use crate::gate;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::types::{
    ContainerRecord, ContainerStatus, ExecOptions, ExecResult, PortBinding, ResourceLimits,
    ResourceUsage, WorkspaceFile,
};
use crate::workspace;

/// Default wall-clock budget for a single command (5 minutes)
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period passed to the runtime when stopping a container
const STOP_GRACE_SECS: i64 = 10;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Host directory holding one subdirectory per workspace
    pub workspaces_root: PathBuf,
    /// Image used for workspace containers
    pub base_image: String,
    /// Per-user ceiling on concurrently running containers
    pub max_containers_per_user: usize,
    /// Idle minutes before a container is stopped when the manifest gives none
    pub default_idle_minutes: u64,
    /// Host ports drawn from this range for preview bindings
    pub port_range: Range<u16>,
    /// Dev-server port inside the container
    pub internal_port: u16,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspaces_root: PathBuf::from("/tmp/workbench-workspaces"),
            base_image: "node:20-alpine".to_string(),
            max_containers_per_user: 5,
            default_idle_minutes: 60,
            port_range: 3000..4000,
            internal_port: 3000,
        }
    }
}

/// Container manager owning the in-memory workspace registry.
///
/// Cheap to clone; all clones share the same registry and runtime handle.
#[derive(Clone)]
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<SandboxConfig>,
    containers: Arc<RwLock<HashMap<String, ContainerRecord>>>,
    idle_timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self {
            runtime,
            config: Arc::new(config),
            containers: Arc::new(RwLock::new(HashMap::new())),
            idle_timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Remove containers left over from a previous process lifetime.
    ///
    /// Restarts must never accumulate orphans: every container carrying the
    /// managed label is force-stopped and removed before serving traffic.
    pub async fn reconcile_startup(&self) {
        let ids = match self.runtime.list_managed().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to list leftover containers: {}", e);
                return;
            }
        };

        for id in ids {
            if let Err(e) = self.runtime.stop(&id, 5).await {
                warn!("Failed to stop orphaned container {}: {}", id, e);
            }
            match self.runtime.remove(&id, true).await {
                Ok(_) => info!("Cleaned up orphaned container: {}", id),
                Err(e) => warn!("Failed to remove orphaned container {}: {}", id, e),
            }
        }
    }

    /// Create a sandboxed container for a workspace.
    ///
    /// Reuses the existing record when the workspace already has a running
    /// container. The capacity check, port allocation, and registration happen
    /// under one write lock so concurrent creations cannot both slip past the
    /// per-user ceiling or collide on a port.
    pub async fn create_container(
        &self,
        workspace_id: &str,
        user_id: &str,
        limits: ResourceLimits,
        files: Option<Vec<WorkspaceFile>>,
        env: Option<HashMap<String, String>>,
    ) -> Result<ContainerRecord> {
        let env = build_env(workspace_id, user_id, env.as_ref())?;

        let host_port = {
            let mut containers = self.containers.write().await;

            // One live container per workspace: reuse a running one, reject
            // while a concurrent creation still holds the slot
            if let Some(existing) = containers.get(workspace_id) {
                match existing.status {
                    ContainerStatus::Running => {
                        debug!("Reusing running container for workspace {}", workspace_id);
                        return Ok(existing.clone());
                    }
                    _ => {
                        return Err(SandboxError::ProvisioningInProgress(
                            workspace_id.to_string(),
                        ))
                    }
                }
            }

            let active = containers
                .values()
                .filter(|c| c.user_id == user_id && c.status != ContainerStatus::Stopped)
                .count();
            if active >= self.config.max_containers_per_user {
                return Err(SandboxError::QuotaExceeded {
                    limit: self.config.max_containers_per_user,
                });
            }

            let used: HashSet<u16> = containers
                .values()
                .flat_map(|c| c.ports.iter().map(|p| p.external))
                .collect();
            let host_port = allocate_port(&used, &self.config.port_range)?;

            // Placeholder holds the port and quota slot while the runtime works
            containers.insert(
                workspace_id.to_string(),
                ContainerRecord {
                    container_id: String::new(),
                    workspace_id: workspace_id.to_string(),
                    user_id: user_id.to_string(),
                    status: ContainerStatus::Starting,
                    created_at: Utc::now(),
                    ports: vec![PortBinding {
                        internal: self.config.internal_port,
                        external: host_port,
                    }],
                    memory_usage_mb: None,
                    cpu_usage_percent: None,
                },
            );
            host_port
        };

        let record = match self
            .provision(workspace_id, user_id, &limits, files, env, host_port)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.containers.write().await.remove(workspace_id);
                return Err(e);
            }
        };

        let idle_minutes = if limits.timeout_minutes > 0 {
            limits.timeout_minutes
        } else {
            self.config.default_idle_minutes
        };
        self.schedule_idle_stop(workspace_id.to_string(), idle_minutes);

        info!("Created container for workspace: {}", workspace_id);
        Ok(record)
    }

    /// Materialize the workspace and start the container; registry slot is
    /// already held by the caller.
    async fn provision(
        &self,
        workspace_id: &str,
        user_id: &str,
        limits: &ResourceLimits,
        files: Option<Vec<WorkspaceFile>>,
        env: Vec<String>,
        host_port: u16,
    ) -> Result<ContainerRecord> {
        let workspace_path =
            match workspace::materialize(&self.config.workspaces_root, workspace_id, files.as_deref())
                .await
            {
                Ok(path) => path,
                Err(e @ SandboxError::InvalidFilePath(_)) => return Err(e),
                Err(e) => {
                    error!("Failed to materialize workspace {}: {}", workspace_id, e);
                    return Err(SandboxError::ProvisioningFailed);
                }
            };

        let spec = ContainerSpec {
            name: format!("workbench-{}", workspace_id),
            image: self.config.base_image.clone(),
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            workspace_path: workspace_path.to_string_lossy().into_owned(),
            host_port,
            internal_port: self.config.internal_port,
            env,
            memory_mb: limits.memory_mb,
            cpu_cores: limits.cpu_cores,
            disk_gb: limits.disk_gb,
        };

        let container_id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                // Runtime diagnostics stay in the logs; callers get a generic error
                error!("Failed to create container for {}: {}", workspace_id, e);
                return Err(SandboxError::ProvisioningFailed);
            }
        };

        let mut containers = self.containers.write().await;
        let record = containers
            .get_mut(workspace_id)
            .expect("placeholder record present during provisioning");
        record.container_id = container_id;
        record.status = ContainerStatus::Running;
        Ok(record.clone())
    }

    /// Execute a gated command inside a workspace's running container.
    ///
    /// Command-level failures (non-zero exit, runtime errors, timeout) come
    /// back as structured results; only a missing container or a rejected
    /// command produce an error.
    pub async fn execute_command(
        &self,
        workspace_id: &str,
        command: &str,
        options: ExecOptions,
    ) -> Result<ExecResult> {
        let container_id = {
            let containers = self.containers.read().await;
            match containers.get(workspace_id) {
                Some(record) if record.status == ContainerStatus::Running => {
                    record.container_id.clone()
                }
                _ => return Err(SandboxError::ContainerNotRunning(workspace_id.to_string())),
            }
        };

        let sanitized = gate::sanitize_command(command)
            .ok_or_else(|| SandboxError::CommandRejected(command.to_string()))?;

        let timeout = options.timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT);
        let workdir = options.cwd.unwrap_or_else(|| "/workspace".to_string());

        match tokio::time::timeout(timeout, self.runtime.exec(&container_id, &sanitized, &workdir))
            .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!("Command failed in workspace {}: {}", workspace_id, e);
                Ok(ExecResult::failure(e.to_string()))
            }
            Err(_) => {
                // The invocation is abandoned; the container stays up
                warn!(
                    "Command timed out after {}s in workspace {}",
                    timeout.as_secs(),
                    workspace_id
                );
                Ok(ExecResult {
                    stdout: String::new(),
                    stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
                    exit_code: 124,
                })
            }
        }
    }

    /// Live resource usage for a running container; `None` when the container
    /// is not running or the runtime query fails.
    pub async fn resource_usage(&self, workspace_id: &str) -> Option<ResourceUsage> {
        let container_id = {
            let containers = self.containers.read().await;
            match containers.get(workspace_id) {
                Some(record) if record.status == ContainerStatus::Running => {
                    record.container_id.clone()
                }
                _ => return None,
            }
        };

        match self.runtime.stats(&container_id).await {
            Ok(usage) => {
                let mut containers = self.containers.write().await;
                if let Some(record) = containers.get_mut(workspace_id) {
                    record.memory_usage_mb = Some(usage.memory_used_mb);
                    record.cpu_usage_percent = Some(usage.cpu_usage_percent);
                }
                Some(usage)
            }
            Err(e) => {
                debug!("Stats query failed for workspace {}: {}", workspace_id, e);
                None
            }
        }
    }

    /// Stop and remove a workspace's container. Idempotent; teardown errors
    /// are logged and never propagated.
    pub async fn stop_container(&self, workspace_id: &str) {
        let record = {
            let mut containers = self.containers.write().await;
            containers.remove(workspace_id)
        };

        if let Some(handle) = self
            .idle_timers
            .lock()
            .expect("idle timer lock poisoned")
            .remove(workspace_id)
        {
            handle.abort();
        }

        let Some(record) = record else {
            debug!("No container registered for workspace {}", workspace_id);
            return;
        };

        if record.container_id.is_empty() {
            return;
        }

        if let Err(e) = self.runtime.stop(&record.container_id, STOP_GRACE_SECS).await {
            warn!("Failed to stop container for {}: {}", workspace_id, e);
        }
        if let Err(e) = self.runtime.remove(&record.container_id, true).await {
            warn!("Failed to remove container for {}: {}", workspace_id, e);
        }

        info!("Stopped container: {}", workspace_id);
    }

    /// Stop every registered container; used during graceful shutdown
    pub async fn stop_all(&self) {
        let workspace_ids: Vec<String> = {
            let containers = self.containers.read().await;
            containers.keys().cloned().collect()
        };

        info!("Stopping {} containers", workspace_ids.len());
        for workspace_id in workspace_ids {
            self.stop_container(&workspace_id).await;
        }
    }

    /// Snapshot of a workspace's container record
    pub async fn get_container(&self, workspace_id: &str) -> Option<ContainerRecord> {
        self.containers.read().await.get(workspace_id).cloned()
    }

    /// Snapshot of all container records owned by a user
    pub async fn user_containers(&self, user_id: &str) -> Vec<ContainerRecord> {
        self.containers
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Arm the one-shot idle timer for a freshly created container
    fn schedule_idle_stop(&self, workspace_id: String, minutes: u64) {
        let manager = self.clone();
        let timer_workspace_id = workspace_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
            let still_running = matches!(
                manager.get_container(&timer_workspace_id).await,
                Some(record) if record.status == ContainerStatus::Running
            );
            if still_running {
                info!("Idle timeout reached for workspace: {}", timer_workspace_id);
                manager.stop_container(&timer_workspace_id).await;
            }
        });

        let mut timers = self.idle_timers.lock().expect("idle timer lock poisoned");
        if let Some(previous) = timers.insert(workspace_id, handle) {
            previous.abort();
        }
    }
}

/// Pick a free host port from the configured range, retrying on collision
fn allocate_port(used: &HashSet<u16>, range: &Range<u16>) -> Result<u16> {
    let capacity = (range.end - range.start) as usize;
    if used.len() >= capacity {
        error!("Host port range exhausted ({} ports in use)", used.len());
        return Err(SandboxError::ProvisioningFailed);
    }

    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(range.start..range.end);
        if !used.contains(&port) {
            return Ok(port);
        }
    }
}

/// Assemble the container environment: base variables plus validated caller
/// extras. Keys must be identifier-shaped; values must not carry control
/// characters that could smuggle extra variables or commands.
fn build_env(
    workspace_id: &str,
    user_id: &str,
    extra: Option<&HashMap<String, String>>,
) -> Result<Vec<String>> {
    let mut env = vec![
        "NODE_ENV=development".to_string(),
        format!("WORKSPACE_ID={}", workspace_id),
        format!("USER_ID={}", user_id),
    ];

    if let Some(extra) = extra {
        for (key, value) in extra {
            let valid_key = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !key.chars().next().unwrap_or('0').is_ascii_digit();
            if !valid_key {
                return Err(SandboxError::InvalidEnvVar(key.clone()));
            }
            if value.chars().any(|c| c.is_control()) {
                return Err(SandboxError::InvalidEnvVar(key.clone()));
            }
            env.push(format!("{}={}", key, value));
        }
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerSpec;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// In-memory runtime standing in for Docker
    struct FakeRuntime {
        exec_calls: AtomicUsize,
        exec_delay: Option<Duration>,
    }

    impl FakeRuntime {
        fn new() -> Self {
            Self {
                exec_calls: AtomicUsize::new(0),
                exec_delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                exec_calls: AtomicUsize::new(0),
                exec_delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn create(&self, spec: &ContainerSpec) -> Result<String> {
            Ok(format!("ctr-{}", spec.name))
        }

        async fn exec(
            &self,
            _container_id: &str,
            command: &str,
            _workdir: &str,
        ) -> Result<ExecResult> {
            self.exec_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.exec_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ExecResult {
                stdout: format!("ran: {}", command),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn stats(&self, _container_id: &str) -> Result<ResourceUsage> {
            Ok(ResourceUsage {
                memory_used_mb: 128,
                cpu_usage_percent: 12.5,
            })
        }

        async fn stop(&self, _container_id: &str, _timeout_secs: i64) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _container_id: &str, _force: bool) -> Result<()> {
            Ok(())
        }

        async fn list_managed(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn test_manager(root: &TempDir) -> ContainerManager {
        test_manager_with(root, FakeRuntime::new())
    }

    fn test_manager_with(root: &TempDir, runtime: FakeRuntime) -> ContainerManager {
        let config = SandboxConfig {
            workspaces_root: root.path().to_path_buf(),
            ..SandboxConfig::default()
        };
        ContainerManager::new(Arc::new(runtime), config)
    }

    #[tokio::test]
    async fn creates_and_registers_container() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        let record = manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();

        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(record.container_id, "ctr-workbench-ws-1");
        assert_eq!(record.ports.len(), 1);
        assert!(manager.get_container("ws-1").await.is_some());
    }

    #[tokio::test]
    async fn reuses_running_container_for_same_workspace() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        let first = manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();
        let second = manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();

        assert_eq!(first.container_id, second.container_id);
        assert_eq!(manager.user_containers("user-1").await.len(), 1);
    }

    #[tokio::test]
    async fn enforces_per_user_container_ceiling() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        for i in 0..5 {
            manager
                .create_container(
                    &format!("ws-{}", i),
                    "user-1",
                    ResourceLimits::default(),
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        let result = manager
            .create_container("ws-5", "user-1", ResourceLimits::default(), None, None)
            .await;

        assert!(matches!(
            result,
            Err(SandboxError::QuotaExceeded { limit: 5 })
        ));
        // The rejected creation must leave no partial state behind
        assert!(manager.get_container("ws-5").await.is_none());
        assert_eq!(manager.user_containers("user-1").await.len(), 5);
    }

    #[tokio::test]
    async fn allocates_unique_external_ports() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        let mut ports = HashSet::new();
        for i in 0..5 {
            let record = manager
                .create_container(
                    &format!("ws-{}", i),
                    &format!("user-{}", i),
                    ResourceLimits::default(),
                    None,
                    None,
                )
                .await
                .unwrap();
            let external = record.ports[0].external;
            assert!((3000..4000).contains(&external));
            assert!(ports.insert(external), "port {} allocated twice", external);
        }
    }

    #[tokio::test]
    async fn executes_gated_command() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);
        manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();

        let result = manager
            .execute_command("ws-1", "ls -la", ExecOptions::default())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "ran: ls -la");
    }

    #[tokio::test]
    async fn rejects_denied_command_without_executing() {
        let root = TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        let manager = test_manager_with(&root, runtime);
        manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();

        let result = manager
            .execute_command("ws-1", "curl http://evil", ExecOptions::default())
            .await;

        assert!(matches!(result, Err(SandboxError::CommandRejected(_))));
    }

    #[tokio::test]
    async fn errors_when_no_running_container() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        let result = manager
            .execute_command("missing", "ls", ExecOptions::default())
            .await;

        assert!(matches!(result, Err(SandboxError::ContainerNotRunning(_))));
    }

    #[tokio::test]
    async fn reports_timeout_as_failure_result() {
        let root = TempDir::new().unwrap();
        let manager = test_manager_with(&root, FakeRuntime::slow(Duration::from_millis(200)));
        manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();

        let result = manager
            .execute_command(
                "ws-1",
                "ls",
                ExecOptions {
                    timeout: Some(Duration::from_millis(10)),
                    cwd: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, 124);
        assert!(result.stderr.contains("timed out"));
        // The container itself survives the timeout
        assert!(manager.get_container("ws-1").await.is_some());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        // No container registered; must not panic or error
        manager.stop_container("missing").await;

        manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();
        manager.stop_container("ws-1").await;
        manager.stop_container("ws-1").await;

        assert!(manager.get_container("ws-1").await.is_none());
    }

    #[tokio::test]
    async fn stopping_frees_quota_slot() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        for i in 0..5 {
            manager
                .create_container(
                    &format!("ws-{}", i),
                    "user-1",
                    ResourceLimits::default(),
                    None,
                    None,
                )
                .await
                .unwrap();
        }
        manager.stop_container("ws-0").await;

        let result = manager
            .create_container("ws-5", "user-1", ResourceLimits::default(), None, None)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn resource_usage_updates_record_samples() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);
        manager
            .create_container("ws-1", "user-1", ResourceLimits::default(), None, None)
            .await
            .unwrap();

        let usage = manager.resource_usage("ws-1").await.unwrap();
        assert_eq!(usage.memory_used_mb, 128);

        let record = manager.get_container("ws-1").await.unwrap();
        assert_eq!(record.memory_usage_mb, Some(128));

        assert!(manager.resource_usage("missing").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_stops_container() {
        let root = TempDir::new().unwrap();
        let manager = test_manager(&root);

        manager
            .create_container(
                "ws-1",
                "user-1",
                ResourceLimits {
                    timeout_minutes: 1,
                    ..ResourceLimits::default()
                },
                None,
                None,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        // Let the timer task run to completion
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(manager.get_container("ws-1").await.is_none());
    }

    #[test]
    fn rejects_malformed_env_keys() {
        let env = HashMap::from([("BAD-KEY".to_string(), "x".to_string())]);
        assert!(build_env("ws", "user", Some(&env)).is_err());

        let env = HashMap::from([("1BAD".to_string(), "x".to_string())]);
        assert!(build_env("ws", "user", Some(&env)).is_err());

        let env = HashMap::from([("GOOD_KEY".to_string(), "evil\ninjection".to_string())]);
        assert!(build_env("ws", "user", Some(&env)).is_err());

        let env = HashMap::from([("DATABASE_URL".to_string(), "postgres://x".to_string())]);
        let built = build_env("ws", "user", Some(&env)).unwrap();
        assert!(built.contains(&"DATABASE_URL=postgres://x".to_string()));
    }
}
