//! Administrator command routes.

use axum::{Json, Router, extract::State, middleware, routing::get, routing::post};
use serde::Serialize;

use crate::api::middleware::require_admin_token;
use crate::api::server::AppState;
use crate::commands::{self, CommandReply};
use crate::render::TestEmailContext;

/// Create the admin router. Every route sits behind the admin token check.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(exception_status))
        .route("/cache/clear", post(clear_exception_cache))
        .route("/test-email", post(test_error_email))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Reply text shown to the administrator.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub message: String,
}

fn reply(reply: impl CommandReply) -> Json<CommandResponse> {
    Json(CommandResponse {
        message: reply.message(),
    })
}

async fn exception_status(State(state): State<AppState>) -> Json<CommandResponse> {
    reply(commands::handle_exception_status(&state.monitor))
}

async fn clear_exception_cache(State(state): State<AppState>) -> Json<CommandResponse> {
    reply(commands::handle_clear_cache(&state.monitor))
}

async fn test_error_email(State(state): State<AppState>) -> Json<CommandResponse> {
    let ctx = TestEmailContext {
        platform: "http".to_string(),
        sender_name: "administrator".to_string(),
        sender_id: "admin-api".to_string(),
    };
    reply(commands::handle_test_email(&state.monitor, ctx).await)
}
