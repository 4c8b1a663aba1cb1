// ABOUTME: HTTP handlers for the preview proxy routes
// ABOUTME: Plain requests forward after auth; upgrades require an existing session

use std::net::SocketAddr;

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Path, State, WebSocketUpgrade},
    http::{request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use workbench_preview::{PreviewProxy, SessionInfo};
use workbench_sandboxes::ContainerManager;

use crate::auth::{CurrentUser, USER_HEADER};
use crate::error::ApiError;

/// Optional WebSocket upgrade extractor.
///
/// axum 0.8 only implements `FromRequestParts` (not `OptionalFromRequestParts`)
/// for `WebSocketUpgrade`, so `Option<WebSocketUpgrade>` cannot be used directly.
/// This wrapper reproduces the same semantics: `Some` when the request is a
/// WebSocket upgrade, `None` otherwise.
pub struct OptionalWs(pub Option<WebSocketUpgrade>);

impl<S> FromRequestParts<S> for OptionalWs
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalWs(
            WebSocketUpgrade::from_request_parts(parts, state).await.ok(),
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct PreviewInfoResponse {
    pub available: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

/// Preview session info for a workspace
///
/// GET /preview/{workspace_id}/info
pub async fn preview_info(
    State(containers): State<ContainerManager>,
    State(proxy): State<PreviewProxy>,
    current_user: CurrentUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<PreviewInfoResponse>, ApiError> {
    let record = containers
        .get_container(&workspace_id)
        .await
        .ok_or(ApiError::NotFound)?;

    if record.user_id != current_user.id {
        return Err(ApiError::Forbidden);
    }

    let session = proxy.sessions.info(&workspace_id).await;
    Ok(Json(PreviewInfoResponse {
        available: session.is_some(),
        url: format!("/api/preview/{}/", workspace_id),
        session,
    }))
}

/// Preview traffic addressed to the workspace root
///
/// ANY /preview/{workspace_id}
pub async fn preview_root(
    OptionalWs(ws): OptionalWs,
    State(proxy): State<PreviewProxy>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(workspace_id): Path<String>,
    req: Request<Body>,
) -> Response {
    dispatch(proxy, ws, addr, workspace_id, String::new(), req).await
}

/// Preview traffic addressed below the workspace root
///
/// ANY /preview/{workspace_id}/{*path}
pub async fn preview_path(
    OptionalWs(ws): OptionalWs,
    State(proxy): State<PreviewProxy>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((workspace_id, path)): Path<(String, String)>,
    req: Request<Body>,
) -> Response {
    dispatch(proxy, ws, addr, workspace_id, path, req).await
}

/// Route a preview request either through the HTTP forwarder or, for
/// connection upgrades, into the WebSocket bridge. Upgrades never create
/// routing state: without a session established by a prior plain request the
/// socket is refused.
async fn dispatch(
    proxy: PreviewProxy,
    ws: Option<WebSocketUpgrade>,
    addr: SocketAddr,
    workspace_id: String,
    path: String,
    req: Request<Body>,
) -> Response {
    match ws {
        Some(upgrade) => {
            let Some(port) = proxy.sessions.cached_port(&workspace_id).await else {
                warn!("Upgrade refused: no preview session for {}", workspace_id);
                return StatusCode::NOT_FOUND.into_response();
            };

            let query = req.uri().query().map(|q| q.to_string());
            upgrade.on_upgrade(move |socket| async move {
                proxy
                    .bridge_upgrade(&workspace_id, port, &path, query.as_deref(), socket)
                    .await;
            })
        }
        None => {
            // Plain requests carry the externally-verified identity header
            let user_id = req
                .headers()
                .get(USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|id| !id.is_empty())
                .map(str::to_string);

            let Some(user_id) = user_id else {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "error": "Authentication required" })),
                )
                    .into_response();
            };

            proxy
                .handle_request(&workspace_id, &user_id, &path, Some(addr.ip()), req)
                .await
        }
    }
}
