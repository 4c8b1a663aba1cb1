// ABOUTME: Health and status probe handlers
// ABOUTME: Status includes live session and container counts

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::json;

use crate::AppState;

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /status
pub async fn status_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "terminal_sessions": state.gateway.sessions.count().await,
        "preview_sessions": state.proxy.sessions.count().await,
    }))
}
