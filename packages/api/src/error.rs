// ABOUTME: API error type mapping domain failures to HTTP statuses
// ABOUTME: Internal diagnostics stay in the logs; clients get generic messages

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use workbench_sandboxes::SandboxError;

use crate::response::ApiResponse;

/// Errors surfaced by REST handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Workspace not found")]
    NotFound,

    #[error("Access denied")]
    Forbidden,
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Workspace not found".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Access denied".to_string()),
            ApiError::Sandbox(e) => match e {
                SandboxError::QuotaExceeded { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, e.to_string())
                }
                SandboxError::CommandRejected(_) => {
                    (StatusCode::BAD_REQUEST, "Command not allowed".to_string())
                }
                SandboxError::ContainerNotRunning(_) => {
                    (StatusCode::NOT_FOUND, "Workspace not found".to_string())
                }
                SandboxError::InvalidFilePath(_) | SandboxError::InvalidEnvVar(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                SandboxError::ProvisioningInProgress(_) => {
                    (StatusCode::CONFLICT, e.to_string())
                }
                SandboxError::ProvisioningFailed => {
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
                other => {
                    error!("Internal error serving API request: {}", other);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
