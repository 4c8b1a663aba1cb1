// ABOUTME: Authentication context for API requests
// ABOUTME: Identity arrives pre-verified from the upstream identity layer

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

/// Header carrying the externally-authenticated user id
pub const USER_HEADER: &str = "x-workbench-user";

/// Current authenticated user.
///
/// Credential verification happens upstream; requests reaching this service
/// carry the resolved identity in a trusted header. Requests without it are
/// rejected before any handler runs.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(|id| CurrentUser { id: id.to_string() })
            .ok_or((StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}
