//! HTTP surface over the matchmaker. Handlers stay thin: parse, call one
//! engine operation, map the result to JSON or a status code.

pub mod moderation;
pub mod requests;
pub mod search;
pub mod sessions;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use tracing::warn;

use parley_engine::{EngineError, Matchmaker};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub matchmaker: Matchmaker,
}

/// Routes for every pairing operation. The gateway socket is mounted by the
/// server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/users/{user_id}/search",
            post(search::enqueue_search).delete(search::cancel_search),
        )
        .route("/waiting", get(search::list_waiting))
        .route(
            "/users/{user_id}/requests",
            post(requests::request_chat).get(requests::pending_requests),
        )
        .route(
            "/users/{user_id}/requests/{request_id}/accept",
            post(requests::accept_request),
        )
        .route(
            "/users/{user_id}/requests/{request_id}/decline",
            post(requests::decline_request),
        )
        .route("/users/{user_id}/end", post(sessions::end_chat))
        .route("/sessions/{session_id}/touch", post(sessions::touch_session))
        .route("/users/{user_id}/block", post(moderation::block_user))
        .route("/users/{user_id}/report", post(moderation::report_user))
        .route("/users/{user_id}/reports", get(moderation::reports_against))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/profile", put(users::update_profile))
        .route("/users/{user_id}/credits", post(users::grant_credits))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn health() -> &'static str {
    "ok"
}

/// Map an engine failure to a response status, logging server-side faults.
pub(crate) fn engine_status(err: EngineError) -> StatusCode {
    match err {
        EngineError::Invalid(_) => StatusCode::BAD_REQUEST,
        other => {
            warn!("Request failed: {}", other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
