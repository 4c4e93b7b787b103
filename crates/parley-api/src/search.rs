use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_types::api::{CancelResponse, SearchRequest, SearchResponse};
use parley_types::models::{MatchOutcome, UserId};

use crate::{AppState, engine_status};

pub async fn enqueue_search(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    body: Option<Json<SearchRequest>>,
) -> Result<impl IntoResponse, StatusCode> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let outcome = state
        .matchmaker
        .enqueue_search(user_id, req.filter)
        .await
        .map_err(engine_status)?;

    Ok(Json(search_response(outcome)))
}

pub(crate) fn search_response(outcome: MatchOutcome) -> SearchResponse {
    let pairing = outcome.pairing();
    SearchResponse {
        matched: pairing.is_some(),
        outcome: outcome.label().to_string(),
        partner_id: pairing.map(|(partner, _)| partner),
        session_id: pairing.map(|(_, session)| session),
    }
}

pub async fn cancel_search(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let cancelled = state
        .matchmaker
        .cancel_search(user_id)
        .await
        .map_err(engine_status)?;
    Ok(Json(CancelResponse { cancelled }))
}

#[derive(Debug, Deserialize)]
pub struct WaitingQuery {
    pub limit: Option<u32>,
}

pub async fn list_waiting(
    State(state): State<AppState>,
    Query(query): Query<WaitingQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let waiting = state
        .matchmaker
        .list_waiting(query.limit.unwrap_or(50))
        .await
        .map_err(engine_status)?;
    Ok(Json(waiting))
}
