use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_types::api::{BlockRequest, EndChatResponse, ReportRequest};
use parley_types::models::UserId;

use crate::{AppState, engine_status};

const MAX_REASON_LEN: usize = 1000;

pub async fn block_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<BlockRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let ended_session = state
        .matchmaker
        .block_and_end(user_id, req.target_id)
        .await
        .map_err(engine_status)?;
    Ok(Json(EndChatResponse { ended_session }))
}

pub async fn report_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ReportRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.reason.len() > MAX_REASON_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    let report_id = state
        .matchmaker
        .report_user(user_id, req.reported_id, &req.reason)
        .await
        .map_err(engine_status)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "report_id": report_id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    pub limit: Option<u32>,
}

pub async fn reports_against(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<ReportsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let reports = state
        .matchmaker
        .reports_against(user_id, query.limit.unwrap_or(50))
        .await
        .map_err(engine_status)?;
    Ok(Json(reports))
}
