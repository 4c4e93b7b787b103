//! Row shapes as stored in SQLite. Converted into parley-types models at the
//! engine boundary.

use anyhow::{Result, anyhow};
use rusqlite::Row;

use parley_types::models::{
    ChatRequest, MatchFilter, Report, RequestStatus, Session, SessionStatus, User, UserStatus,
    WaitingUser,
};

use crate::from_millis;

pub(crate) const USER_COLUMNS: &str = "id, username, gender, province, city, status, partner_id, \
     credits, created_at, queued_seq, search_gender, search_province, search_city";

pub(crate) const SESSION_COLUMNS: &str =
    "id, user_a, user_b, started_at, last_activity, ended_at, status";

pub(crate) const REQUEST_COLUMNS: &str = "id, from_id, to_id, status, created_at, resolved_at";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: Option<String>,
    pub gender: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub status: String,
    pub partner_id: Option<i64>,
    pub credits: i64,
    pub created_at: i64,
    pub queued_seq: Option<i64>,
    pub search_gender: Option<String>,
    pub search_province: Option<String>,
    pub search_city: Option<String>,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            gender: row.get(2)?,
            province: row.get(3)?,
            city: row.get(4)?,
            status: row.get(5)?,
            partner_id: row.get(6)?,
            credits: row.get(7)?,
            created_at: row.get(8)?,
            queued_seq: row.get(9)?,
            search_gender: row.get(10)?,
            search_province: row.get(11)?,
            search_city: row.get(12)?,
        })
    }

    pub fn status(&self) -> Result<UserStatus> {
        self.status.parse().map_err(|e: String| anyhow!(e))
    }

    pub fn is(&self, status: UserStatus) -> bool {
        self.status == status.as_str()
    }

    /// The filter recorded when the user entered the search pool.
    pub fn search_filter(&self) -> MatchFilter {
        MatchFilter {
            gender: self.search_gender.clone(),
            province: self.search_province.clone(),
            city: self.search_city.clone(),
        }
    }

    pub fn into_user(self) -> Result<User> {
        let status = self.status()?;
        Ok(User {
            id: self.id,
            username: self.username,
            gender: self.gender,
            province: self.province,
            city: self.city,
            status,
            partner_id: self.partner_id,
            credits: self.credits,
            created_at: from_millis(self.created_at),
        })
    }

    pub fn into_waiting(self) -> WaitingUser {
        WaitingUser {
            user_id: self.id,
            username: self.username,
            gender: self.gender,
            province: self.province,
            city: self.city,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: i64,
    pub user_a: i64,
    pub user_b: i64,
    pub started_at: i64,
    pub last_activity: i64,
    pub ended_at: Option<i64>,
    pub status: String,
}

impl SessionRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_a: row.get(1)?,
            user_b: row.get(2)?,
            started_at: row.get(3)?,
            last_activity: row.get(4)?,
            ended_at: row.get(5)?,
            status: row.get(6)?,
        })
    }

    pub fn into_session(self) -> Result<Session> {
        let status: SessionStatus = self.status.parse().map_err(|e: String| anyhow!(e))?;
        Ok(Session {
            id: self.id,
            user_a: self.user_a,
            user_b: self.user_b,
            started_at: from_millis(self.started_at),
            last_activity: from_millis(self.last_activity),
            ended_at: self.ended_at.map(from_millis),
            status,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub id: i64,
    pub reporter_id: i64,
    pub reported_id: i64,
    pub reason: String,
    pub created_at: i64,
}

impl ReportRow {
    pub fn into_report(self) -> Report {
        Report {
            id: self.id,
            reporter_id: self.reporter_id,
            reported_id: self.reported_id,
            reason: self.reason,
            created_at: from_millis(self.created_at),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestRow {
    pub id: i64,
    pub from_id: i64,
    pub to_id: i64,
    pub status: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl RequestRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            from_id: row.get(1)?,
            to_id: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            resolved_at: row.get(5)?,
        })
    }

    pub fn is(&self, status: RequestStatus) -> bool {
        self.status == status.as_str()
    }

    pub fn into_request(self) -> Result<ChatRequest> {
        let status: RequestStatus = self.status.parse().map_err(|e: String| anyhow!(e))?;
        Ok(ChatRequest {
            id: self.id,
            from_id: self.from_id,
            to_id: self.to_id,
            status,
            created_at: from_millis(self.created_at),
            resolved_at: self.resolved_at.map(from_millis),
        })
    }
}
