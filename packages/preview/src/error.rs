// ABOUTME: Error types for preview routing
// ABOUTME: Each variant maps to a distinct client-visible status

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Routing errors surfaced to preview clients
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Workspace not found: {workspace_id}")]
    WorkspaceNotFound { workspace_id: String },

    #[error("Access denied")]
    AccessDenied,

    #[error("Preview port not configured for workspace: {workspace_id}")]
    PortNotConfigured { workspace_id: String },

    #[error("Preview server not responding")]
    UpstreamUnavailable,
}

/// Result type for preview operations
pub type Result<T> = std::result::Result<T, ProxyError>;

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ProxyError::WorkspaceNotFound { .. } => (
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "error": "Preview not available",
                    "message": "Workspace not found. Start a terminal session first.",
                }),
            ),
            ProxyError::AccessDenied => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": "Access denied" }),
            ),
            ProxyError::PortNotConfigured { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Preview port not configured" }),
            ),
            ProxyError::UpstreamUnavailable => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": "Preview server not responding",
                    "message": "Make sure your dev server is running (npm run dev)",
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
