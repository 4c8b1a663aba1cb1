// ABOUTME: Preview session cache mapping workspaces to resolved host ports
// ABOUTME: Sessions are created lazily on first access and swept when inactive

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;

/// Preview sessions idle longer than this are evicted (1 hour)
pub const PREVIEW_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Eviction sweep cadence (5 minutes)
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Cached routing target for one workspace's preview traffic
#[derive(Debug)]
pub struct PreviewSession {
    pub workspace_id: String,
    pub port: u16,
    pub last_access: Instant,
    pub access_count: u64,
}

/// Snapshot of a preview session for API consumers
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub workspace_id: String,
    pub port: u16,
    pub access_count: u64,
    pub idle_secs: u64,
}

/// Registry of active preview sessions keyed by workspace id
#[derive(Clone, Default)]
pub struct PreviewSessionRegistry {
    sessions: Arc<RwLock<HashMap<String, PreviewSession>>>,
}

impl PreviewSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached port for a workspace, creating the session on first
    /// access. Every call bumps the access counter and timestamp.
    pub async fn resolve_or_insert(&self, workspace_id: &str, port: u16) -> u16 {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(workspace_id.to_string())
            .or_insert_with(|| PreviewSession {
                workspace_id: workspace_id.to_string(),
                port,
                last_access: Instant::now(),
                access_count: 0,
            });
        session.last_access = Instant::now();
        session.access_count += 1;
        session.port
    }

    /// Cached port for a workspace without creating a session.
    /// Upgrade requests use this: they never establish routing state.
    pub async fn cached_port(&self, workspace_id: &str) -> Option<u16> {
        self.sessions.read().await.get(workspace_id).map(|s| s.port)
    }

    pub async fn info(&self, workspace_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(workspace_id).map(|s| SessionInfo {
            workspace_id: s.workspace_id.clone(),
            port: s.port,
            access_count: s.access_count,
            idle_secs: s.last_access.elapsed().as_secs(),
        })
    }

    /// Drop a workspace's routing state
    pub async fn close(&self, workspace_id: &str) {
        if self.sessions.write().await.remove(workspace_id).is_some() {
            info!("Preview session closed: {}", workspace_id);
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict sessions inactive beyond `idle_timeout`
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_access) > idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for workspace_id in &expired {
            info!("Evicting inactive preview session: {}", workspace_id);
            sessions.remove(workspace_id);
        }

        expired.len()
    }
}

/// Spawn the periodic eviction sweep for a registry
pub fn start_sweep_task(registry: PreviewSessionRegistry) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            registry.sweep_idle(PREVIEW_IDLE_TIMEOUT).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn first_access_creates_session_and_counts() {
        let registry = PreviewSessionRegistry::new();

        assert_eq!(registry.cached_port("ws-1").await, None);

        let port = registry.resolve_or_insert("ws-1", 3456).await;
        assert_eq!(port, 3456);
        assert_eq!(registry.cached_port("ws-1").await, Some(3456));

        registry.resolve_or_insert("ws-1", 3456).await;
        let info = registry.info("ws-1").await.unwrap();
        assert_eq!(info.access_count, 2);
    }

    #[tokio::test]
    async fn cached_port_wins_over_later_resolutions() {
        let registry = PreviewSessionRegistry::new();

        registry.resolve_or_insert("ws-1", 3456).await;
        // The cache is authoritative until the session is closed
        let port = registry.resolve_or_insert("ws-1", 3999).await;
        assert_eq!(port, 3456);

        registry.close("ws-1").await;
        let port = registry.resolve_or_insert("ws-1", 3999).await;
        assert_eq!(port, 3999);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_inactive_sessions() {
        let registry = PreviewSessionRegistry::new();
        registry.resolve_or_insert("ws-old", 3001).await;
        registry.resolve_or_insert("ws-fresh", 3002).await;

        tokio::time::advance(Duration::from_secs(61 * 60)).await;
        registry.resolve_or_insert("ws-fresh", 3002).await;

        let swept = registry.sweep_idle(PREVIEW_IDLE_TIMEOUT).await;
        assert_eq!(swept, 1);
        assert_eq!(registry.cached_port("ws-old").await, None);
        assert_eq!(registry.cached_port("ws-fresh").await, Some(3002));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = PreviewSessionRegistry::new();
        registry.close("missing").await;
        assert_eq!(registry.count().await, 0);
    }
}
