// ABOUTME: WebSocket gateway translating terminal envelopes into container commands
// ABOUTME: Validates connection parameters, provisions lazily, streams results back

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use workbench_sandboxes::{ContainerManager, ContainerStatus, ExecOptions, ResourceLimits};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::rate_limit::CommandRateLimiter;
use crate::session::{OutboundFrame, SessionRegistry, TerminalSession};

/// Connection rejected before the session became usable
const CLOSE_PROVISIONING_FAILED: u16 = 4000;
/// Required query parameters were absent
const CLOSE_MISSING_PARAMS: u16 = 4001;

const HELP_TEXT: &str = "
Available Commands:
  npm install [package]  - Install npm packages
  npm run [script]       - Run package.json scripts
  npm run dev            - Start development server
  ls                     - List files
  cat [file]             - Show file contents
  mkdir [dir]            - Create directory
  cd [dir]               - Change directory
  pwd                    - Print working directory
  clear                  - Clear terminal
  help                   - Show this help
  exit                   - Close terminal session

Security Notes:
  - Commands run in an isolated container
  - Limited to safe operations only
  - Resource usage is monitored
  - Sessions timeout after 30 minutes of inactivity
";

/// Shared state behind the terminal WebSocket route
#[derive(Clone)]
pub struct TerminalGateway {
    pub containers: ContainerManager,
    pub sessions: SessionRegistry,
    pub rate_limiter: Arc<CommandRateLimiter>,
}

impl TerminalGateway {
    pub fn new(containers: ContainerManager) -> Self {
        Self {
            containers,
            sessions: SessionRegistry::new(),
            rate_limiter: Arc::new(CommandRateLimiter::default()),
        }
    }
}

/// Identifying parameters supplied out-of-band on the upgrade request.
/// The token is checked for presence only; verification belongs to the
/// external identity collaborator.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub workspace_id: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
}

/// GET /terminal/ws?workspace_id=..&user_id=..&token=..
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(gateway): State<TerminalGateway>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(gateway, socket, params))
}

async fn handle_connection(gateway: TerminalGateway, socket: WebSocket, params: ConnectParams) {
    let (mut sink, mut stream) = socket.split();

    let (Some(workspace_id), Some(user_id), Some(_token)) =
        (params.workspace_id, params.user_id, params.token)
    else {
        // Parameter-level failure: close immediately, nothing reaches the orchestrator
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_MISSING_PARAMS,
                reason: "Missing required parameters".into(),
            })))
            .await;
        return;
    };

    // All outbound traffic funnels through one writer task so command results
    // and sweep notifications cannot interleave mid-frame
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Message(message) => {
                    if sink
                        .send(Message::Text(message.to_json().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                OutboundFrame::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let running = matches!(
        gateway.containers.get_container(&workspace_id).await,
        Some(record) if record.status == ContainerStatus::Running
    );
    if !running {
        send(&tx, ServerMessage::info("Creating isolated environment..."));
        match gateway
            .containers
            .create_container(&workspace_id, &user_id, ResourceLimits::default(), None, None)
            .await
        {
            Ok(_) => send(&tx, ServerMessage::success("Environment ready!")),
            Err(e) => {
                send(
                    &tx,
                    ServerMessage::error(format!("Failed to create environment: {}", e)),
                );
                let _ = tx.send(OutboundFrame::Close {
                    code: CLOSE_PROVISIONING_FAILED,
                    reason: "Container creation failed".to_string(),
                });
                let _ = writer.await;
                return;
            }
        }
    }

    let session_id = format!("{}-{}", user_id, workspace_id);
    gateway
        .sessions
        .insert(
            session_id.clone(),
            TerminalSession::new(workspace_id.clone(), user_id.clone(), tx.clone()),
        )
        .await;
    info!("New terminal session: {}", session_id);

    send(
        &tx,
        ServerMessage::info(format!("Connected to workspace: {}", workspace_id)),
    );
    send(&tx, ServerMessage::info("Type 'help' for available commands"));
    send(&tx, ServerMessage::prompt());

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("WebSocket error for {}: {}", session_id, e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                gateway.sessions.touch(&session_id).await;
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(client_message) => {
                        handle_client_message(
                            &gateway,
                            &session_id,
                            &workspace_id,
                            &user_id,
                            client_message,
                            &tx,
                        )
                        .await
                    }
                    Err(e) => {
                        // Envelope-level failure keeps the session alive
                        debug!("Malformed terminal envelope: {}", e);
                        send(&tx, ServerMessage::error("Invalid message format"));
                    }
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    gateway.sessions.remove(&session_id).await;
    drop(tx);
    let _ = writer.await;
    info!("Terminal session closed: {}", session_id);
}

async fn handle_client_message(
    gateway: &TerminalGateway,
    session_id: &str,
    workspace_id: &str,
    user_id: &str,
    message: ClientMessage,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) {
    match message {
        ClientMessage::Command { command } => {
            run_command(gateway, session_id, workspace_id, user_id, command.trim(), tx).await
        }
        ClientMessage::Ping => send(tx, ServerMessage::pong()),
        ClientMessage::Resize { cols, rows } => {
            // Accepted for protocol compatibility; no PTY is attached
            debug!("Terminal resize acknowledged: {}x{}", cols, rows);
        }
    }
}

async fn run_command(
    gateway: &TerminalGateway,
    session_id: &str,
    workspace_id: &str,
    user_id: &str,
    command: &str,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) {
    if !gateway.rate_limiter.check(user_id) {
        send(tx, ServerMessage::error("Rate limit exceeded. Please slow down."));
        send(tx, ServerMessage::prompt());
        return;
    }

    match command {
        "help" => {
            send(tx, ServerMessage::info(HELP_TEXT));
            send(tx, ServerMessage::prompt());
            return;
        }
        "clear" => {
            send(tx, ServerMessage::clear());
            send(tx, ServerMessage::prompt());
            return;
        }
        "exit" => {
            send(tx, ServerMessage::info("Closing session..."));
            let _ = tx.send(OutboundFrame::Close {
                code: 1000,
                reason: "Client exit".to_string(),
            });
            return;
        }
        _ => {}
    }

    gateway.sessions.record_command(session_id, command).await;

    send(tx, ServerMessage::executing(command));

    match gateway
        .containers
        .execute_command(workspace_id, command, ExecOptions::default())
        .await
    {
        Ok(result) => {
            if !result.stdout.is_empty() {
                send(tx, ServerMessage::output(result.stdout));
            }
            if !result.stderr.is_empty() {
                send(tx, ServerMessage::error(result.stderr));
            }
            if result.exit_code != 0 {
                send(
                    tx,
                    ServerMessage::error(format!("Command exited with code {}", result.exit_code)),
                );
            }
        }
        Err(e) => send(tx, ServerMessage::error(format!("Execution failed: {}", e))),
    }

    send(tx, ServerMessage::prompt());
}

fn send(tx: &mpsc::UnboundedSender<OutboundFrame>, message: ServerMessage) {
    let _ = tx.send(OutboundFrame::Message(message));
}
