use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::api::EndChatResponse;
use parley_types::models::{SessionId, UserId};

use crate::{AppState, engine_status};

pub async fn end_chat(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let ended_session = state
        .matchmaker
        .end_chat(user_id)
        .await
        .map_err(engine_status)?;
    Ok(Json(EndChatResponse { ended_session }))
}

/// 204 when the session was active, 404 when it is unknown or already closed.
pub async fn touch_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, StatusCode> {
    let touched = state
        .matchmaker
        .touch(session_id)
        .await
        .map_err(engine_status)?;
    if touched {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
