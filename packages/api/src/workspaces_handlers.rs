// ABOUTME: HTTP request handlers for workspace lifecycle operations
// ABOUTME: Provisioning, inspection, teardown, and the REST command-exec fallback

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use workbench_preview::PreviewProxy;
use workbench_sandboxes::{
    ContainerManager, ContainerRecord, ExecOptions, ResourceLimits, ResourceUsage, WorkspaceFile,
};

use crate::auth::CurrentUser;
use crate::error::ApiError;

/// Request body for workspace provisioning
#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: Option<String>,
    pub memory_mb: Option<u64>,
    pub cpu_cores: Option<f64>,
    pub disk_gb: Option<u64>,
    pub timeout_minutes: Option<u64>,
    /// Pre-built project files seeding the workspace
    #[serde(default)]
    pub files: Option<Vec<WorkspaceFile>>,
    /// Extra environment variables (e.g. database credentials)
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct CreateWorkspaceResponse {
    pub message: &'static str,
    pub workspace_id: String,
    pub name: String,
    pub file_count: usize,
    pub preview_url: String,
    pub websocket_url: String,
    pub container: ContainerRecord,
}

/// Workspace summary for get/list responses
#[derive(Debug, Serialize)]
pub struct WorkspaceInfo {
    pub workspace_id: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub preview_url: String,
    pub websocket_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,
}

impl WorkspaceInfo {
    fn from_record(record: &ContainerRecord, usage: Option<ResourceUsage>) -> Self {
        Self {
            workspace_id: record.workspace_id.clone(),
            status: record.status.as_str(),
            created_at: record.created_at,
            preview_url: preview_url(&record.workspace_id),
            websocket_url: websocket_url(&record.workspace_id),
            usage,
        }
    }
}

fn preview_url(workspace_id: &str) -> String {
    format!("/api/preview/{}/", workspace_id)
}

fn websocket_url(workspace_id: &str) -> String {
    format!("/api/terminal/ws?workspace_id={}", workspace_id)
}

/// Create a new workspace with its container
///
/// POST /workspaces
pub async fn create_workspace(
    State(containers): State<ContainerManager>,
    current_user: CurrentUser,
    Json(request): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<CreateWorkspaceResponse>), ApiError> {
    let workspace_id = Uuid::new_v4().to_string();
    let name = request.name.unwrap_or_else(|| "My Workspace".to_string());

    let defaults = ResourceLimits::default();
    let limits = ResourceLimits {
        memory_mb: request.memory_mb.unwrap_or(defaults.memory_mb),
        cpu_cores: request.cpu_cores.unwrap_or(defaults.cpu_cores),
        disk_gb: request.disk_gb.unwrap_or(defaults.disk_gb),
        timeout_minutes: request.timeout_minutes.unwrap_or(defaults.timeout_minutes),
    };

    let file_count = request.files.as_ref().map(|f| f.len()).unwrap_or(0);

    let container = containers
        .create_container(
            &workspace_id,
            &current_user.id,
            limits,
            request.files,
            request.env,
        )
        .await?;

    info!("Workspace created: {}", workspace_id);

    Ok((
        StatusCode::CREATED,
        Json(CreateWorkspaceResponse {
            message: "Workspace created successfully",
            preview_url: preview_url(&workspace_id),
            websocket_url: websocket_url(&workspace_id),
            workspace_id,
            name,
            file_count,
            container,
        }),
    ))
}

/// Get workspace info with live resource usage
///
/// GET /workspaces/{workspace_id}
pub async fn get_workspace(
    State(containers): State<ContainerManager>,
    current_user: CurrentUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<WorkspaceInfo>, ApiError> {
    let record = containers
        .get_container(&workspace_id)
        .await
        .ok_or(ApiError::NotFound)?;

    if record.user_id != current_user.id {
        return Err(ApiError::Forbidden);
    }

    let usage = containers.resource_usage(&workspace_id).await;
    Ok(Json(WorkspaceInfo::from_record(&record, usage)))
}

#[derive(Debug, Serialize)]
pub struct ListWorkspacesResponse {
    pub count: usize,
    pub workspaces: Vec<WorkspaceInfo>,
}

/// List the caller's workspaces
///
/// GET /workspaces
pub async fn list_workspaces(
    State(containers): State<ContainerManager>,
    current_user: CurrentUser,
) -> Json<ListWorkspacesResponse> {
    let workspaces: Vec<WorkspaceInfo> = containers
        .user_containers(&current_user.id)
        .await
        .iter()
        .map(|record| WorkspaceInfo::from_record(record, None))
        .collect();

    Json(ListWorkspacesResponse {
        count: workspaces.len(),
        workspaces,
    })
}

/// Stop and remove a workspace, closing its preview session
///
/// DELETE /workspaces/{workspace_id}
pub async fn delete_workspace(
    State(containers): State<ContainerManager>,
    State(proxy): State<PreviewProxy>,
    current_user: CurrentUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = containers
        .get_container(&workspace_id)
        .await
        .ok_or(ApiError::NotFound)?;

    if record.user_id != current_user.id {
        return Err(ApiError::Forbidden);
    }

    containers.stop_container(&workspace_id).await;
    proxy.sessions.close(&workspace_id).await;

    info!("Workspace stopped: {}", workspace_id);
    Ok(Json(
        serde_json::json!({ "message": "Workspace stopped successfully" }),
    ))
}

/// Request body for the REST exec fallback
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    pub timeout_secs: Option<u64>,
    pub cwd: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub success: bool,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Execute a command in a workspace for non-WebSocket clients
///
/// POST /workspaces/{workspace_id}/exec
pub async fn exec_command(
    State(containers): State<ContainerManager>,
    current_user: CurrentUser,
    Path(workspace_id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ExecResponse>, ApiError> {
    let record = containers
        .get_container(&workspace_id)
        .await
        .ok_or(ApiError::NotFound)?;

    if record.user_id != current_user.id {
        return Err(ApiError::Forbidden);
    }

    let options = ExecOptions {
        timeout: request.timeout_secs.map(Duration::from_secs),
        cwd: request.cwd,
    };

    let result = containers
        .execute_command(&workspace_id, &request.command, options)
        .await?;

    Ok(Json(ExecResponse {
        success: result.exit_code == 0,
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
    }))
}
