// ABOUTME: Terminal session gateway for Workbench
// ABOUTME: Maps WebSocket connections to workspaces and streams command results

pub mod gateway;
pub mod protocol;
pub mod rate_limit;
pub mod session;

pub use gateway::{terminal_ws_handler, TerminalGateway};
pub use protocol::{ClientMessage, MessageKind, ServerMessage};
pub use rate_limit::CommandRateLimiter;
pub use session::{OutboundFrame, SessionRegistry, TerminalSession};
