// ABOUTME: Terminal session registry with bounded history and idle sweep
// ABOUTME: Sessions are keyed by user and workspace; a periodic task expires idle ones

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::protocol::ServerMessage;

/// Sessions idle longer than this are closed by the sweep (30 minutes)
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Idle sweep cadence
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Recent commands kept per session, oldest evicted first
const HISTORY_LIMIT: usize = 100;

/// Frame routed to the per-connection writer task
#[derive(Debug)]
pub enum OutboundFrame {
    /// A protocol notice for the client
    Message(ServerMessage),
    /// Close the connection with the given code after flushing
    Close { code: u16, reason: String },
}

/// One live terminal connection bound to a workspace
pub struct TerminalSession {
    pub workspace_id: String,
    pub user_id: String,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    last_activity: Instant,
    history: VecDeque<String>,
}

impl TerminalSession {
    pub fn new(
        workspace_id: String,
        user_id: String,
        tx: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Self {
        Self {
            workspace_id,
            user_id,
            tx,
            last_activity: Instant::now(),
            history: VecDeque::new(),
        }
    }
}

/// Registry of live terminal sessions, shared across connection tasks and the
/// idle sweeper. Keys are `{user_id}-{workspace_id}`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, TerminalSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: String, session: TerminalSession) {
        let mut sessions = self.sessions.write().await;
        if sessions.insert(session_id.clone(), session).is_some() {
            warn!("Replaced existing terminal session: {}", session_id);
        }
    }

    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Refresh the session's activity timestamp
    pub async fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.last_activity = Instant::now();
        }
    }

    /// Append a command to the session's bounded history ring
    pub async fn record_command(&self, session_id: &str, command: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.history.push_back(command.to_string());
            if session.history.len() > HISTORY_LIMIT {
                session.history.pop_front();
            }
        }
    }

    pub async fn history(&self, session_id: &str) -> Vec<String> {
        match self.sessions.read().await.get(session_id) {
            Some(session) => session.history.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Close and remove every session idle longer than `idle_timeout`.
    /// The client is notified before the connection is dropped.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_activity) > idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            if let Some(session) = sessions.remove(session_id) {
                info!("Closing inactive terminal session: {}", session_id);
                let _ = session.tx.send(OutboundFrame::Message(ServerMessage::info(
                    "Session timed out due to inactivity",
                )));
                let _ = session.tx.send(OutboundFrame::Close {
                    code: 1000,
                    reason: "Idle timeout".to_string(),
                });
            }
        }

        expired.len()
    }
}

/// Spawn the periodic idle sweep for a registry
pub fn start_sweep_task(registry: SessionRegistry) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            registry.sweep_idle(SESSION_IDLE_TIMEOUT).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session_with_channel(
        workspace: &str,
        user: &str,
    ) -> (TerminalSession, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TerminalSession::new(workspace.to_string(), user.to_string(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn history_ring_evicts_oldest_past_limit() {
        let registry = SessionRegistry::new();
        let (session, _rx) = session_with_channel("ws-1", "user-1");
        registry.insert("user-1-ws-1".to_string(), session).await;

        for i in 0..150 {
            registry
                .record_command("user-1-ws-1", &format!("echo {}", i))
                .await;
        }

        let history = registry.history("user-1-ws-1").await;
        assert_eq!(history.len(), 100);
        assert_eq!(history.first().unwrap(), "echo 50");
        assert_eq!(history.last().unwrap(), "echo 149");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_only_idle_sessions() {
        let registry = SessionRegistry::new();
        let (idle, mut idle_rx) = session_with_channel("ws-1", "user-1");
        let (active, _active_rx) = session_with_channel("ws-2", "user-2");
        registry.insert("user-1-ws-1".to_string(), idle).await;
        registry.insert("user-2-ws-2".to_string(), active).await;

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        registry.touch("user-2-ws-2").await;

        let swept = registry.sweep_idle(SESSION_IDLE_TIMEOUT).await;
        assert_eq!(swept, 1);
        assert_eq!(registry.count().await, 1);

        // The expired client was notified, then closed
        let first = idle_rx.recv().await.unwrap();
        assert!(matches!(first, OutboundFrame::Message(_)));
        let second = idle_rx.recv().await.unwrap();
        assert!(matches!(second, OutboundFrame::Close { code: 1000, .. }));
    }

    #[tokio::test]
    async fn removing_unknown_session_is_harmless() {
        let registry = SessionRegistry::new();
        registry.remove("missing").await;
        assert_eq!(registry.count().await, 0);
    }
}
