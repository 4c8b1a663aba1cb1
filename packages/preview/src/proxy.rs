// ABOUTME: Preview proxy forwarding workspace traffic to container dev servers
// ABOUTME: Plain requests go through reqwest; upgrades bridge two WebSocket halves

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::ws::{CloseFrame, Message, WebSocket},
    response::{IntoResponse, Response},
};
use http::{header, HeaderMap, Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::CloseFrame as UpstreamCloseFrame,
    tungstenite::Message as UpstreamMessage,
};
use tracing::{debug, info, warn};

use workbench_sandboxes::ContainerManager;

use crate::error::{ProxyError, Result};
use crate::session::PreviewSessionRegistry;

/// Upstream connect/read budget for forwarded requests
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Request body cap for proxied traffic (10 MB)
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Hop-by-hop headers that must not be forwarded either direction
const HOP_HEADERS: &[header::HeaderName] = &[
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Reverse proxy for workspace dev servers
#[derive(Clone)]
pub struct PreviewProxy {
    containers: ContainerManager,
    pub sessions: PreviewSessionRegistry,
    client: reqwest::Client,
}

impl PreviewProxy {
    pub fn new(containers: ContainerManager) -> Self {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            containers,
            sessions: PreviewSessionRegistry::new(),
            client,
        }
    }

    /// Resolve the routing target for a workspace, enforcing ownership and
    /// lazily establishing the preview session.
    pub async fn resolve(&self, workspace_id: &str, user_id: &str) -> Result<u16> {
        let record = self
            .containers
            .get_container(workspace_id)
            .await
            .ok_or_else(|| ProxyError::WorkspaceNotFound {
                workspace_id: workspace_id.to_string(),
            })?;

        if record.user_id != user_id {
            return Err(ProxyError::AccessDenied);
        }

        let internal = self.containers.config().internal_port;
        let port = record
            .external_port(internal)
            .ok_or_else(|| ProxyError::PortNotConfigured {
                workspace_id: workspace_id.to_string(),
            })?;

        Ok(self.sessions.resolve_or_insert(workspace_id, port).await)
    }

    /// Forward one plain HTTP request to the workspace's dev server.
    /// Routing failures come back as their distinct statuses; upstream
    /// transport errors become a 502 with actionable guidance.
    pub async fn handle_request(
        &self,
        workspace_id: &str,
        user_id: &str,
        downstream_path: &str,
        client_ip: Option<IpAddr>,
        req: Request<Body>,
    ) -> Response {
        match self
            .forward(workspace_id, user_id, downstream_path, client_ip, req)
            .await
        {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    async fn forward(
        &self,
        workspace_id: &str,
        user_id: &str,
        downstream_path: &str,
        client_ip: Option<IpAddr>,
        req: Request<Body>,
    ) -> Result<Response> {
        let port = self.resolve(workspace_id, user_id).await?;

        let method = req.method().clone();
        let headers = req.headers().clone();
        let query = req
            .uri()
            .query()
            .map(|q| format!("?{}", q))
            .unwrap_or_default();

        // The routing prefix is stripped so the dev server sees a normal path
        let path = downstream_path.trim_start_matches('/');
        let target = format!("http://127.0.0.1:{}/{}{}", port, path, query);
        debug!("Proxying {} {} -> {}", method, downstream_path, target);

        let body = to_bytes(req.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|_| ProxyError::UpstreamUnavailable)?;

        let mut proxy_req = self.client.request(method, &target).body(body.to_vec());
        for (key, value) in headers.iter() {
            if !HOP_HEADERS.contains(key) {
                proxy_req = proxy_req.header(key, value);
            }
        }

        proxy_req = proxy_req
            .header(
                "x-forwarded-for",
                client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            )
            .header("x-forwarded-proto", "http");
        if let Some(host) = original_host(&headers) {
            proxy_req = proxy_req.header("x-forwarded-host", host);
        }

        let upstream = proxy_req.send().await.map_err(|e| {
            warn!("Preview upstream error for {}: {}", workspace_id, e);
            ProxyError::UpstreamUnavailable
        })?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let bytes = upstream.bytes().await.map_err(|e| {
            warn!("Failed to read preview upstream body: {}", e);
            ProxyError::UpstreamUnavailable
        })?;

        let mut builder = Response::builder().status(status);
        for (key, value) in upstream_headers.iter() {
            if !HOP_HEADERS.contains(key) {
                builder = builder.header(key, value);
            }
        }

        Ok(builder.body(Body::from(bytes)).unwrap_or_else(|e| {
            warn!("Failed to assemble preview response: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }))
    }

    /// Bridge an already-accepted client WebSocket to the dev server's socket,
    /// preserving streaming semantics for hot-reload channels. The caller has
    /// verified that a preview session exists for this workspace.
    pub async fn bridge_upgrade(
        &self,
        workspace_id: &str,
        port: u16,
        downstream_path: &str,
        query: Option<&str>,
        mut socket: WebSocket,
    ) {
        let path = downstream_path.trim_start_matches('/');
        let target = match query {
            Some(q) => format!("ws://127.0.0.1:{}/{}?{}", port, path, q),
            None => format!("ws://127.0.0.1:{}/{}", port, path),
        };
        info!("WebSocket upgrade for {} -> {}", workspace_id, target);

        let (upstream, _response) = match connect_async(&target).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Upstream WebSocket connect failed for {}: {}", workspace_id, e);
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        };

        let (mut upstream_sink, mut upstream_stream) = upstream.split();
        let (mut client_sink, mut client_stream) = socket.split();

        let client_to_upstream = async {
            while let Some(Ok(message)) = client_stream.next().await {
                let Some(converted) = to_upstream_message(message) else {
                    continue;
                };
                let closing = matches!(converted, UpstreamMessage::Close(_));
                if upstream_sink.send(converted).await.is_err() || closing {
                    break;
                }
            }
        };

        let upstream_to_client = async {
            while let Some(Ok(message)) = upstream_stream.next().await {
                let Some(converted) = to_client_message(message) else {
                    continue;
                };
                let closing = matches!(converted, Message::Close(_));
                if client_sink.send(converted).await.is_err() || closing {
                    break;
                }
            }
        };

        // Either side closing tears the bridge down
        tokio::select! {
            _ = client_to_upstream => {}
            _ = upstream_to_client => {}
        }

        debug!("Preview upgrade bridge closed for {}", workspace_id);
    }
}

fn original_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

fn to_upstream_message(message: Message) -> Option<UpstreamMessage> {
    match message {
        Message::Text(text) => Some(UpstreamMessage::Text(text.as_str().into())),
        Message::Binary(data) => Some(UpstreamMessage::Binary(data)),
        Message::Ping(data) => Some(UpstreamMessage::Ping(data)),
        Message::Pong(data) => Some(UpstreamMessage::Pong(data)),
        Message::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        }))),
    }
}

fn to_client_message(message: UpstreamMessage) -> Option<Message> {
    match message {
        UpstreamMessage::Text(text) => Some(Message::Text(text.as_str().into())),
        UpstreamMessage::Binary(data) => Some(Message::Binary(data)),
        UpstreamMessage::Ping(data) => Some(Message::Ping(data)),
        UpstreamMessage::Pong(data) => Some(Message::Pong(data)),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        }))),
        UpstreamMessage::Frame(_) => None,
    }
}
