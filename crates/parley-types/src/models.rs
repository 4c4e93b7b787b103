use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally assigned user identity (stable, unique).
pub type UserId = i64;

/// Internal session identity, assigned by the store.
pub type SessionId = i64;

/// Matchmaking status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Idle,
    Searching,
    Chatting,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Chatting => "chatting",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "searching" => Ok(Self::Searching),
            "chatting" => Ok(Self::Chatting),
            other => Err(format!("unknown user status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    /// Voided before the pair ever chatted (delivery of the match notice failed).
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Profile dimensions a search can be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Gender,
    Province,
    City,
}

/// Optional profile constraints a searcher puts on a candidate.
/// Every populated field must match (AND); an empty filter matches anyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl MatchFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    pub fn city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints().is_empty()
    }

    /// Populated dimensions as (profile field, required value) pairs.
    pub fn constraints(&self) -> Vec<(ProfileField, &str)> {
        [
            (ProfileField::Gender, &self.gender),
            (ProfileField::Province, &self.province),
            (ProfileField::City, &self.city),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }

    /// Drops blank strings so `Some("")` from a form means "no constraint".
    pub fn normalized(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            gender: keep(self.gender),
            province: keep(self.province),
            city: keep(self.city),
        }
    }
}

/// Result of one matching attempt. Only `Matched` carries a pairing; every
/// other variant is a normal, non-error "no match" result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Matched {
        partner_id: UserId,
        session_id: SessionId,
    },
    /// No eligible candidate right now; the requester stays in the pool.
    Queued,
    /// Requester (or the locked candidate) could not pay for the match.
    InsufficientCredit,
    /// Requester is already in a chat; nothing changed.
    AlreadyChatting,
    /// The pair was matched but the match notice could not be delivered, so
    /// the session was voided and both credits refunded.
    Cancelled { session_id: SessionId },
    /// A retry for a user who already left the pool; nothing changed.
    NotSearching,
    /// The chat request is gone, already answered, or addressed to someone else.
    RequestUnavailable,
}

impl MatchOutcome {
    pub fn pairing(&self) -> Option<(UserId, SessionId)> {
        match *self {
            Self::Matched {
                partner_id,
                session_id,
            } => Some((partner_id, session_id)),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched { .. } => "matched",
            Self::Queued => "queued",
            Self::InsufficientCredit => "insufficient_credit",
            Self::AlreadyChatting => "already_chatting",
            Self::Cancelled { .. } => "cancelled",
            Self::NotSearching => "not_searching",
            Self::RequestUnavailable => "request_unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub gender: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub status: UserStatus,
    pub partner_id: Option<UserId>,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    pub fn involves(&self, user_id: UserId) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other participant, if `user_id` is one of the pair.
    pub fn partner_of(&self, user_id: UserId) -> Option<UserId> {
        if self.user_a == user_id {
            Some(self.user_b)
        } else if self.user_b == user_id {
            Some(self.user_a)
        } else {
            None
        }
    }
}

/// Public summary of a user waiting in the search pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingUser {
    pub user_id: UserId,
    pub username: Option<String>,
    pub gender: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
}

/// Identity of a direct chat request.
pub type RequestId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

/// A direct invitation from a user browsing the waiting list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub id: RequestId,
    pub from_id: UserId,
    pub to_id: UserId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Result of sending a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Sent { request_id: RequestId },
    /// An earlier request to the same user is still open.
    AlreadyPending { request_id: RequestId },
    InsufficientCredit,
    AlreadyChatting,
    /// Target is unknown, busy, or the pair is blocked.
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub reporter_id: UserId,
    pub reported_id: UserId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
