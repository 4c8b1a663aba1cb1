// ABOUTME: Per-user sliding-window throttle for terminal command execution
// ABOUTME: Fixed window counter; saturated windows reject until they expire

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default ceiling: 50 commands per minute per user
const DEFAULT_MAX_COMMANDS: u32 = 50;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

struct WindowState {
    count: u32,
    reset_at: Instant,
}

/// Per-user command rate limiter.
///
/// Each user gets an independent window; the first command after expiry
/// resets it. Saturated windows reject without touching the orchestrator.
pub struct CommandRateLimiter {
    max_commands: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl Default for CommandRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMMANDS, DEFAULT_WINDOW)
    }
}

impl CommandRateLimiter {
    pub fn new(max_commands: u32, window: Duration) -> Self {
        Self {
            max_commands,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one command attempt; `false` means the ceiling is hit
    pub fn check(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limit lock poisoned");

        match windows.get_mut(user_id) {
            Some(window) if now < window.reset_at => {
                if window.count >= self.max_commands {
                    return false;
                }
                window.count += 1;
                true
            }
            _ => {
                windows.insert(
                    user_id.to_string(),
                    WindowState {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }
}
