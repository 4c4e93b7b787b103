use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_types::api::{ChatRequestBody, DeclineResponse};
use parley_types::models::{RequestId, UserId};

use crate::search::search_response;
use crate::{AppState, engine_status};

pub async fn request_chat(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let outcome = state
        .matchmaker
        .request_chat(user_id, req.target_id)
        .await
        .map_err(engine_status)?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<u32>,
}

pub async fn pending_requests(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let pending = state
        .matchmaker
        .pending_requests(user_id, query.limit.unwrap_or(50))
        .await
        .map_err(engine_status)?;
    Ok(Json(pending))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Path((user_id, request_id)): Path<(UserId, RequestId)>,
) -> Result<impl IntoResponse, StatusCode> {
    let outcome = state
        .matchmaker
        .accept_request(user_id, request_id)
        .await
        .map_err(engine_status)?;
    Ok(Json(search_response(outcome)))
}

pub async fn decline_request(
    State(state): State<AppState>,
    Path((user_id, request_id)): Path<(UserId, RequestId)>,
) -> Result<impl IntoResponse, StatusCode> {
    let declined = state
        .matchmaker
        .decline_request(user_id, request_id)
        .await
        .map_err(engine_status)?;
    Ok(Json(DeclineResponse { declined }))
}
