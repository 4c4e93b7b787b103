use serde::{Deserialize, Serialize};

use crate::models::{MatchFilter, SessionId, UserId, UserStatus};

// -- Search --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    #[serde(default)]
    pub filter: MatchFilter,
}

/// Result of a search request. `matched` is false for every non-match outcome;
/// `outcome` names which one.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub matched: bool,
    pub outcome: String,
    pub partner_id: Option<UserId>,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndChatResponse {
    pub ended_session: Option<SessionId>,
}

// -- Direct requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequestBody {
    pub target_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeclineResponse {
    pub declined: bool,
}

// -- Moderation --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockRequest {
    pub target_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportRequest {
    pub reported_id: UserId,
    #[serde(default)]
    pub reason: String,
}

// -- Profile / credits --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileRequest {
    pub username: Option<String>,
    pub gender: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantCreditsRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserStateResponse {
    pub user_id: UserId,
    pub status: UserStatus,
    pub partner_id: Option<UserId>,
    pub credits: i64,
    pub session_id: Option<SessionId>,
}
