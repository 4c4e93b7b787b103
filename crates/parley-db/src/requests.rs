//! Direct chat requests: one user asks a specific other user for a chat.
//! Accepting runs the same charge-and-pair steps as a pool match.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::debug;

use parley_types::models::{
    MatchOutcome, RequestId, RequestOutcome, RequestStatus, UserId, UserStatus,
};

use crate::matching::{MATCH_COST, pair_users};
use crate::models::{REQUEST_COLUMNS, RequestRow};
use crate::{Database, moderation, to_millis, users};

impl Database {
    pub fn create_request(
        &self,
        from: UserId,
        to: UserId,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome> {
        let starting = self.starting_credits();
        self.with_tx(|tx| create_request(tx, from, to, starting, now))
    }

    pub fn accept_request(
        &self,
        id: RequestId,
        acceptor: UserId,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome> {
        self.with_tx(|tx| accept_request(tx, id, acceptor, now))
    }

    /// Decline a pending request addressed to `decliner`. Returns the user
    /// who sent it, or `None` if there was nothing to decline.
    pub fn decline_request(
        &self,
        id: RequestId,
        decliner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>> {
        self.with_tx(|tx| {
            let Some(request) = query_request(tx, id)? else {
                return Ok(None);
            };
            if request.to_id != decliner || !request.is(RequestStatus::Pending) {
                return Ok(None);
            }
            resolve(tx, id, RequestStatus::Declined, now)?;
            Ok(Some(request.from_id))
        })
    }

    pub fn get_request(&self, id: RequestId) -> Result<Option<RequestRow>> {
        self.with_conn(|conn| query_request(conn, id))
    }

    /// Open requests addressed to `user`, oldest first.
    pub fn pending_requests_for(&self, user: UserId, limit: u32) -> Result<Vec<RequestRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_requests
                 WHERE to_id = ?1 AND status = 'pending'
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?2",
                REQUEST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user, limit], RequestRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub fn create_request(
    tx: &Transaction<'_>,
    from: UserId,
    to: UserId,
    starting_credits: i64,
    now: DateTime<Utc>,
) -> Result<RequestOutcome> {
    let me = users::ensure_user(tx, from, starting_credits, now)?;
    if me.credits < MATCH_COST {
        return Ok(RequestOutcome::InsufficientCredit);
    }
    if me.is(UserStatus::Chatting) {
        return Ok(RequestOutcome::AlreadyChatting);
    }

    let Some(target) = users::query_user(tx, to)? else {
        return Ok(RequestOutcome::Unavailable);
    };
    if target.is(UserStatus::Chatting) || moderation::is_blocked(tx, from, to)? {
        return Ok(RequestOutcome::Unavailable);
    }

    if let Some(existing) = pending_between(tx, from, to)? {
        return Ok(RequestOutcome::AlreadyPending {
            request_id: existing,
        });
    }

    tx.execute(
        "INSERT INTO chat_requests (from_id, to_id, status, created_at)
         VALUES (?1, ?2, 'pending', ?3)",
        params![from, to, to_millis(now)],
    )?;
    Ok(RequestOutcome::Sent {
        request_id: tx.last_insert_rowid(),
    })
}

/// Accept a request and pair both sides, all inside `tx`.
///
/// A request that no longer applies is left pending when the reason may
/// pass (someone is busy or short of credits) and declined when it cannot
/// (a block now stands between the two).
pub fn accept_request(
    tx: &Transaction<'_>,
    id: RequestId,
    acceptor: UserId,
    now: DateTime<Utc>,
) -> Result<MatchOutcome> {
    let Some(request) = query_request(tx, id)? else {
        return Ok(MatchOutcome::RequestUnavailable);
    };
    if request.to_id != acceptor || !request.is(RequestStatus::Pending) {
        return Ok(MatchOutcome::RequestUnavailable);
    }
    let requester = request.from_id;

    if moderation::is_blocked(tx, requester, acceptor)? {
        resolve(tx, id, RequestStatus::Declined, now)?;
        return Ok(MatchOutcome::RequestUnavailable);
    }

    let (Some(me), Some(them)) = (
        users::query_user(tx, acceptor)?,
        users::query_user(tx, requester)?,
    ) else {
        return Ok(MatchOutcome::RequestUnavailable);
    };
    if me.is(UserStatus::Chatting) {
        return Ok(MatchOutcome::AlreadyChatting);
    }
    if them.is(UserStatus::Chatting) {
        debug!("Request {}: sender {} is already chatting", id, requester);
        return Ok(MatchOutcome::RequestUnavailable);
    }
    if me.credits < MATCH_COST || them.credits < MATCH_COST {
        return Ok(MatchOutcome::InsufficientCredit);
    }

    let session_id = pair_users(tx, acceptor, requester, now)?;
    resolve(tx, id, RequestStatus::Accepted, now)?;
    Ok(MatchOutcome::Matched {
        partner_id: requester,
        session_id,
    })
}

pub fn query_request(conn: &Connection, id: RequestId) -> Result<Option<RequestRow>> {
    let sql = format!("SELECT {} FROM chat_requests WHERE id = ?1", REQUEST_COLUMNS);
    let row = conn.query_row(&sql, [id], RequestRow::from_row).optional()?;
    Ok(row)
}

fn pending_between(conn: &Connection, from: UserId, to: UserId) -> Result<Option<RequestId>> {
    let id = conn
        .query_row(
            "SELECT id FROM chat_requests
             WHERE from_id = ?1 AND to_id = ?2 AND status = 'pending'",
            params![from, to],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

fn resolve(
    conn: &Connection,
    id: RequestId,
    status: RequestStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE chat_requests SET status = ?2, resolved_at = ?3
         WHERE id = ?1 AND status = 'pending'",
        params![id, status.as_str(), to_millis(now)],
    )?;
    Ok(changed == 1)
}
