// ABOUTME: Integration tests against a live Docker daemon
// ABOUTME: Ignored by default; run with --ignored on a machine with Docker

use std::sync::Arc;

use tempfile::TempDir;
use workbench_sandboxes::{
    ContainerManager, DockerRuntime, ExecOptions, ResourceLimits, SandboxConfig,
};

fn docker_config(root: &TempDir) -> SandboxConfig {
    SandboxConfig {
        workspaces_root: root.path().to_path_buf(),
        ..SandboxConfig::default()
    }
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn connects_to_docker() {
    let result = DockerRuntime::connect().await;
    assert!(result.is_ok(), "Failed to connect to Docker: {:?}", result.err());
}

#[tokio::test]
#[ignore] // Requires Docker daemon and the base image pulled locally
async fn container_lifecycle_round_trip() {
    let root = TempDir::new().unwrap();
    let runtime = DockerRuntime::connect().await.unwrap();
    let manager = ContainerManager::new(Arc::new(runtime), docker_config(&root));

    let record = manager
        .create_container("it-ws-1", "it-user", ResourceLimits::default(), None, None)
        .await
        .unwrap();
    assert!(!record.container_id.is_empty());

    let result = manager
        .execute_command("it-ws-1", "pwd", ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("/workspace"));

    let usage = manager.resource_usage("it-ws-1").await;
    assert!(usage.is_some());

    manager.stop_container("it-ws-1").await;
    assert!(manager.get_container("it-ws-1").await.is_none());
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn startup_reconciliation_removes_orphans() {
    let root = TempDir::new().unwrap();
    let runtime = DockerRuntime::connect().await.unwrap();
    let manager = ContainerManager::new(Arc::new(runtime), docker_config(&root));

    manager
        .create_container("it-ws-2", "it-user", ResourceLimits::default(), None, None)
        .await
        .unwrap();

    // A fresh manager simulates a process restart; its reconciliation pass
    // must clean up the container the previous lifetime left behind.
    let runtime = DockerRuntime::connect().await.unwrap();
    let fresh = ContainerManager::new(Arc::new(runtime), docker_config(&root));
    fresh.reconcile_startup().await;
}
