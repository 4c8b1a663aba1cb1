// ABOUTME: HTTP API layer for Workbench providing REST endpoints and routing
// ABOUTME: Integration layer over the orchestrator, terminal gateway, and preview proxy

use axum::{
    extract::FromRef,
    routing::{any, get, post},
    Router,
};

use workbench_preview::PreviewProxy;
use workbench_sandboxes::ContainerManager;
use workbench_terminal::{terminal_ws_handler, TerminalGateway};

pub mod auth;
pub mod error;
pub mod health;
pub mod preview_handlers;
pub mod response;
pub mod workspaces_handlers;

pub use auth::CurrentUser;
pub use error::ApiError;
pub use response::ApiResponse;

/// Shared application state behind every route
#[derive(Clone, FromRef)]
pub struct AppState {
    pub containers: ContainerManager,
    pub gateway: TerminalGateway,
    pub proxy: PreviewProxy,
}

impl AppState {
    pub fn new(containers: ContainerManager) -> Self {
        Self {
            gateway: TerminalGateway::new(containers.clone()),
            proxy: PreviewProxy::new(containers.clone()),
            containers,
        }
    }
}

/// Creates the API router; the caller nests it under its public prefix
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/status", get(health::status_check))
        // Workspace lifecycle
        .route(
            "/workspaces",
            post(workspaces_handlers::create_workspace).get(workspaces_handlers::list_workspaces),
        )
        .route(
            "/workspaces/{workspace_id}",
            get(workspaces_handlers::get_workspace).delete(workspaces_handlers::delete_workspace),
        )
        .route(
            "/workspaces/{workspace_id}/exec",
            post(workspaces_handlers::exec_command),
        )
        // Terminal channel
        .route("/terminal/ws", get(terminal_ws_handler))
        // Preview proxy; /info wins over the catch-all
        .route(
            "/preview/{workspace_id}/info",
            get(preview_handlers::preview_info),
        )
        .route(
            "/preview/{workspace_id}",
            any(preview_handlers::preview_root),
        )
        .route(
            "/preview/{workspace_id}/{*path}",
            any(preview_handlers::preview_path),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use workbench_sandboxes::{
        ContainerRuntime, ContainerSpec, ExecResult, ResourceUsage, Result as SandboxResult,
        SandboxConfig,
    };

    struct FakeRuntime;

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn create(&self, spec: &ContainerSpec) -> SandboxResult<String> {
            Ok(format!("ctr-{}", spec.name))
        }
        async fn exec(
            &self,
            _container_id: &str,
            command: &str,
            _workdir: &str,
        ) -> SandboxResult<ExecResult> {
            Ok(ExecResult {
                stdout: format!("ran: {}", command),
                stderr: String::new(),
                exit_code: 0,
            })
        }
        async fn stats(&self, _container_id: &str) -> SandboxResult<ResourceUsage> {
            Ok(ResourceUsage {
                memory_used_mb: 64,
                cpu_usage_percent: 1.0,
            })
        }
        async fn stop(&self, _container_id: &str, _timeout_secs: i64) -> SandboxResult<()> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str, _force: bool) -> SandboxResult<()> {
            Ok(())
        }
        async fn list_managed(&self) -> SandboxResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn test_state(root: &TempDir) -> AppState {
        let config = SandboxConfig {
            workspaces_root: root.path().to_path_buf(),
            ..SandboxConfig::default()
        };
        AppState::new(ContainerManager::new(Arc::new(FakeRuntime), config))
    }

    fn test_router(state: AppState) -> Router {
        // ConnectInfo is normally injected by the server loop
        create_router(state).layer(axum::extract::connect_info::MockConnectInfo(
            SocketAddr::from(([127, 0, 0, 1], 9999)),
        ))
    }

    #[tokio::test]
    async fn health_endpoint_answers_without_auth() {
        let root = TempDir::new().unwrap();
        let router = test_router(test_state(&root));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn workspace_routes_require_identity() {
        let root = TempDir::new().unwrap();
        let router = test_router(test_state(&root));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/workspaces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_then_get_workspace_round_trip() {
        let root = TempDir::new().unwrap();
        let state = test_state(&root);
        let router = test_router(state.clone());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workspaces")
                    .header("content-type", "application/json")
                    .header(auth::USER_HEADER, "user-1")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let records = state.containers.user_containers("user-1").await;
        assert_eq!(records.len(), 1);
        let workspace_id = records[0].workspace_id.clone();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/workspaces/{}", workspace_id))
                    .header(auth::USER_HEADER, "user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Another user cannot inspect it
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/workspaces/{}", workspace_id))
                    .header(auth::USER_HEADER, "intruder")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn exec_fallback_rejects_gated_commands() {
        let root = TempDir::new().unwrap();
        let state = test_state(&root);
        state
            .containers
            .create_container("ws-1", "user-1", Default::default(), None, None)
            .await
            .unwrap();
        let router = test_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workspaces/ws-1/exec")
                    .header("content-type", "application/json")
                    .header(auth::USER_HEADER, "user-1")
                    .body(Body::from(r#"{"command":"curl http://evil"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preview_for_unknown_workspace_is_not_found() {
        let root = TempDir::new().unwrap();
        let router = test_router(test_state(&root));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/preview/missing/index.html")
                    .header(auth::USER_HEADER, "user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
