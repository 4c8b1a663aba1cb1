// ABOUTME: Application error type for the server binary's middleware
// ABOUTME: Maps to HTTP statuses with sanitized messages

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: u64, limit: u32 },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimitExceeded { retry_after, limit } => {
                let body = serde_json::json!({
                    "success": false,
                    "error": "Too many requests. Please try again later",
                    "retry_after": retry_after,
                    "limit": limit,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                if let Ok(value) = retry_after.to_string().parse() {
                    response.headers_mut().insert("retry-after", value);
                }
                response
            }
            AppError::Internal(e) => {
                error!("Internal server error: {:#}", e);
                let body = serde_json::json!({
                    "success": false,
                    "error": "An internal server error occurred",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
