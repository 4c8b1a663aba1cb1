// ABOUTME: Wire envelopes for the terminal WebSocket protocol
// ABOUTME: Tagged client messages in, typed notices with timestamps out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound envelope from the terminal client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Execute a command inside the workspace container
    Command { command: String },
    /// Liveness probe; answered with a pong notice, no side effects
    Ping,
    /// Viewport change; acknowledged only, no PTY backing
    Resize { cols: u16, rows: u16 },
}

/// Discriminator for outbound notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Info,
    Success,
    Error,
    Executing,
    Output,
    Prompt,
    Clear,
    Pong,
}

/// Outbound envelope streamed to the terminal client
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ServerMessage {
    fn new(kind: MessageKind, content: Option<String>) -> Self {
        Self {
            kind,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Info, Some(content.into()))
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Success, Some(content.into()))
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, Some(content.into()))
    }

    pub fn executing(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Executing, Some(content.into()))
    }

    pub fn output(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Output, Some(content.into()))
    }

    pub fn prompt() -> Self {
        Self::new(MessageKind::Prompt, Some("$ ".to_string()))
    }

    pub fn clear() -> Self {
        Self::new(MessageKind::Clear, None)
    }

    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, None)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A ServerMessage always serializes; keep the channel alive anyway
            r#"{"type":"error","content":"serialization failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_command_envelope() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"command","command":"ls -la"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Command { command } if command == "ls -la"));
    }

    #[test]
    fn parses_ping_and_resize() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Resize { cols: 120, rows: 40 }));
    }

    #[test]
    fn rejects_unknown_envelope() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"shutdown"}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<ClientMessage>("not json");
        assert!(result.is_err());
    }

    #[test]
    fn serializes_notice_with_type_tag() {
        let json = ServerMessage::output("hello").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "output");
        assert_eq!(value["content"], "hello");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn pong_omits_content() {
        let json = ServerMessage::pong().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value.get("content").is_none());
    }

    #[test]
    fn prompt_carries_shell_marker() {
        let json = ServerMessage::prompt().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "prompt");
        assert_eq!(value["content"], "$ ");
    }
}
