// ABOUTME: Preview reverse proxy for Workbench workspaces
// ABOUTME: Resolves container ports, forwards HTTP, and bridges upgrade traffic

pub mod error;
pub mod proxy;
pub mod session;

pub use error::{ProxyError, Result};
pub use proxy::PreviewProxy;
pub use session::{PreviewSession, PreviewSessionRegistry, SessionInfo};
