// ABOUTME: Per-IP rate limiting middleware for the REST surface
// ABOUTME: Governor quotas per endpoint category; the terminal channel has its own limiter

use axum::{
    extract::ConnectInfo,
    http::{header::HeaderName, Request},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, Mutex},
};
use tracing::{debug, warn};

use crate::error::AppError;

/// Type alias for a rate limiter
type RateLimiterType = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Type alias for a rate limiter instance
type RateLimiterInstance = Arc<RateLimiterType>;

/// Type alias for the rate limiter storage
type RateLimiterStorage = Arc<Mutex<HashMap<String, RateLimiterInstance>>>;

/// Rate limiting configuration for different endpoint categories
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub health_rpm: u32,     // Health/status probes
    pub workspaces_rpm: u32, // Workspace lifecycle (create, stop, exec)
    pub preview_rpm: u32,    // Preview traffic (high: one page load fans out)
    pub global_rpm: u32,     // Global fallback
    pub burst_size: u32,     // Burst size multiplier
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_rpm: 60,
            workspaces_rpm: 20, // Container operations are resource-intensive
            preview_rpm: 300,   // Asset-heavy dev servers need headroom
            global_rpm: 60,
            burst_size: 5,
        }
    }
}

/// Rate limiter with per-endpoint configuration
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    limiters: RateLimiterStorage,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn rpm_for_category(&self, category: EndpointCategory) -> u32 {
        match category {
            EndpointCategory::Health => self.config.health_rpm,
            EndpointCategory::Workspaces => self.config.workspaces_rpm,
            EndpointCategory::Preview => self.config.preview_rpm,
            EndpointCategory::Other => self.config.global_rpm,
        }
    }

    /// Get or create the limiter for an endpoint category
    fn get_limiter_for_path(&self, path: &str) -> (RateLimiterInstance, u32) {
        let category = categorize_endpoint(path);
        let rpm = self.rpm_for_category(category);

        let mut limiters = self.limiters.lock().expect("rate limiter lock poisoned");
        let key = format!("{}:{}", category.as_str(), rpm);

        if let Some(limiter) = limiters.get(&key) {
            return (limiter.clone(), rpm);
        }

        let quota = Quota::per_minute(NonZeroU32::new(rpm).unwrap_or(NonZeroU32::new(30).unwrap()))
            .allow_burst(
                NonZeroU32::new(rpm * self.config.burst_size / 10)
                    .unwrap_or(NonZeroU32::new(5).unwrap()),
            );

        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(key, limiter.clone());

        debug!(
            endpoint_category = %category.as_str(),
            rpm = %rpm,
            "Created rate limiter for endpoint category"
        );

        (limiter, rpm)
    }
}

#[derive(Debug, Clone, Copy)]
enum EndpointCategory {
    Health,
    Workspaces,
    Preview,
    Other,
}

impl EndpointCategory {
    fn as_str(self) -> &'static str {
        match self {
            EndpointCategory::Health => "health",
            EndpointCategory::Workspaces => "workspaces",
            EndpointCategory::Preview => "preview",
            EndpointCategory::Other => "other",
        }
    }
}

/// Categorize endpoint based on path
fn categorize_endpoint(path: &str) -> EndpointCategory {
    if path.contains("/health") || path.contains("/status") {
        EndpointCategory::Health
    } else if path.contains("/preview") {
        EndpointCategory::Preview
    } else if path.contains("/workspaces") {
        EndpointCategory::Workspaces
    } else {
        EndpointCategory::Other
    }
}

/// Per-IP rate limiting middleware
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let layer = request
        .extensions()
        .get::<RateLimitLayer>()
        .cloned()
        .unwrap_or_else(|| RateLimitLayer::new(RateLimitConfig::default()));

    if !layer.config.enabled {
        return Ok(next.run(request).await);
    }

    // The terminal WebSocket enforces its own per-user command window
    let path = request.uri().path().to_string();
    if path.ends_with("/terminal/ws") {
        return Ok(next.run(request).await);
    }

    let (limiter, rate_limit) = layer.get_limiter_for_path(&path);
    let ip = addr.ip();

    match limiter.check() {
        Ok(_) => {
            let mut response = next.run(request).await;
            if let Ok(limit_value) = axum::http::HeaderValue::from_str(&rate_limit.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-ratelimit-limit"), limit_value);
            }
            Ok(response)
        }
        Err(_) => {
            warn!(
                ip = %ip,
                path = %path,
                "Rate limit exceeded"
            );
            Err(AppError::RateLimitExceeded {
                retry_after: 60,
                limit: rate_limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_endpoints() {
        assert!(matches!(
            categorize_endpoint("/api/health"),
            EndpointCategory::Health
        ));
        assert!(matches!(
            categorize_endpoint("/api/status"),
            EndpointCategory::Health
        ));
        assert!(matches!(
            categorize_endpoint("/api/workspaces"),
            EndpointCategory::Workspaces
        ));
        assert!(matches!(
            categorize_endpoint("/api/workspaces/abc/exec"),
            EndpointCategory::Workspaces
        ));
        assert!(matches!(
            categorize_endpoint("/api/preview/abc/assets/app.js"),
            EndpointCategory::Preview
        ));
        assert!(matches!(
            categorize_endpoint("/api/other"),
            EndpointCategory::Other
        ));
    }

    #[test]
    fn same_category_shares_a_limiter() {
        let layer = RateLimitLayer::new(RateLimitConfig::default());

        let (health_a, _) = layer.get_limiter_for_path("/api/health");
        let (health_b, _) = layer.get_limiter_for_path("/api/status");
        let (preview, _) = layer.get_limiter_for_path("/api/preview/x");

        assert!(Arc::ptr_eq(&health_a, &health_b));
        assert!(!Arc::ptr_eq(&health_a, &preview));
    }

    #[test]
    fn limiter_rejects_past_quota() {
        let quota = Quota::per_minute(NonZeroU32::new(2).unwrap());
        let limiter = RateLimiter::direct(quota);

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
