// =============================================================================
// Admin Authentication — route-layer middleware for the control API
// =============================================================================
//
// Every route except health sits behind `require_admin`, which checks the
// `Authorization: Bearer <token>` header against the admin token resolved
// once when the router is built.
//
//   missing / malformed header   -> 401
//   wrong token                  -> 403
//   no admin token configured    -> 403 (the API is effectively read-locked)
//
// Rejections use the same `{ "error": ... }` body as every other API error.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::api::{api_error, ApiError};

/// Environment variable holding the admin token.
pub const ADMIN_TOKEN_ENV: &str = "GOVERNOR_ADMIN_TOKEN";

/// Admin credential for the control API.
#[derive(Clone)]
pub struct AdminAuth {
    token: Option<String>,
}

impl AdminAuth {
    /// Blank tokens count as unconfigured.
    pub fn new(token: Option<String>) -> Self {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("{} is not set; authenticated API routes will reject every request", ADMIN_TOKEN_ENV);
        }
        Self { token }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(ADMIN_TOKEN_ENV).ok())
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Validate the bearer token carried by `headers`.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let expected = self
            .token
            .as_deref()
            .ok_or_else(|| api_error(StatusCode::FORBIDDEN, "admin token not configured"))?;

        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        if !tokens_match(presented.as_bytes(), expected.as_bytes()) {
            return Err(api_error(StatusCode::FORBIDDEN, "invalid admin token"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Equal-length inputs are compared over every byte.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Route layer guarding the control endpoints.
pub async fn require_admin(
    State(auth): State<Arc<AdminAuth>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(rejection) = auth.check(req.headers()) {
        warn!(
            path = %req.uri().path(),
            status = rejection.0.as_u16(),
            "control API request rejected"
        );
        return Err(rejection);
    }
    Ok(next.run(req).await)
}
