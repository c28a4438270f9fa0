//! Bearer token authentication for the admin routes.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// Require `Authorization: Bearer <admin_token>` when a token is configured.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Admin routes are open when no token is configured
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match token {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Invalid admin token provided");
            Err(ApiError::unauthorized("Invalid admin token"))
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Missing admin token in request");
            Err(ApiError::unauthorized("Missing bearer token"))
        }
    }
}
