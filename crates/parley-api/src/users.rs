use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_db::users::ProfileUpdate;
use parley_types::api::{GrantCreditsRequest, ProfileRequest, UserStateResponse};
use parley_types::models::UserId;

use crate::{AppState, engine_status};

const MAX_FIELD_LEN: usize = 64;

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let (user, session_id) = state
        .matchmaker
        .user_state(user_id)
        .await
        .map_err(engine_status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(UserStateResponse {
        user_id: user.id,
        status: user.status,
        partner_id: user.partner_id,
        credits: user.credits,
        session_id,
    }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ProfileRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let fields = [&req.username, &req.gender, &req.province, &req.city];
    if fields
        .into_iter()
        .flatten()
        .any(|v| v.trim().is_empty() || v.len() > MAX_FIELD_LEN)
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    let trimmed = |v: Option<String>| v.map(|s| s.trim().to_string());
    let profile = ProfileUpdate {
        username: trimmed(req.username),
        gender: trimmed(req.gender),
        province: trimmed(req.province),
        city: trimmed(req.city),
    };

    let user = state
        .matchmaker
        .update_profile(user_id, profile)
        .await
        .map_err(engine_status)?;
    Ok(Json(user))
}

pub async fn grant_credits(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<GrantCreditsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let balance = state
        .matchmaker
        .grant_credits(user_id, req.amount)
        .await
        .map_err(engine_status)?;
    Ok(Json(serde_json::json!({ "user_id": user_id, "credits": balance })))
}
