//! Session registry. Subordinate to the user directory: ending a session only
//! releases participants that are still chatting with each other.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use parley_types::models::{SessionId, SessionStatus, UserId};

use crate::models::{SESSION_COLUMNS, SessionRow};
use crate::{Database, to_millis, users};

/// What `end_chat_for` undid: the partner that was released and the session
/// that was closed, if the pairing still had one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatEnd {
    pub partner_id: UserId,
    pub session_id: Option<SessionId>,
}

impl Database {
    pub fn get_session(&self, id: SessionId) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| query_session(conn, id))
    }

    pub fn active_session_for(&self, user: UserId) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| active_session_for(conn, user))
    }

    /// Idempotent: `false` if the session was already closed (or unknown).
    pub fn end_session(&self, id: SessionId, now: DateTime<Utc>) -> Result<bool> {
        self.with_tx(|tx| end_session(tx, id, SessionStatus::Ended, now))
    }

    /// End whatever chat `user` is in and return both sides to idle.
    /// `None` if there was nothing to end.
    pub fn end_chat_for(&self, user: UserId, now: DateTime<Utc>) -> Result<Option<ChatEnd>> {
        self.with_tx(|tx| {
            let me = users::query_user(tx, user)?;
            if let Some(session) = active_session_for(tx, user)? {
                end_session(tx, session.id, SessionStatus::Ended, now)?;
                let partner_id = if session.user_a == user {
                    session.user_b
                } else {
                    session.user_a
                };
                // a stale pointer elsewhere still has to go
                if let Some(other) = me.as_ref().and_then(|row| row.partner_id) {
                    if other != partner_id {
                        users::release_pair(tx, user, other)?;
                    }
                }
                return Ok(Some(ChatEnd {
                    partner_id,
                    session_id: Some(session.id),
                }));
            }

            // Directory wins: a partner pointer without a live session is
            // still a pairing that has to be undone.
            let Some(partner_id) = me.and_then(|row| row.partner_id) else {
                return Ok(None);
            };
            if users::release_pair(tx, user, partner_id)? == 0 {
                return Ok(None);
            }
            warn!("User {} was chatting with {} without an active session", user, partner_id);
            Ok(Some(ChatEnd {
                partner_id,
                session_id: None,
            }))
        })
    }

    /// End the active session shared by `a` and `b`, if there is one.
    pub fn end_session_between(
        &self,
        a: UserId,
        b: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionId>> {
        self.with_tx(|tx| end_session_between(tx, a, b, now))
    }

    /// End the session only if it is still active and still idle past
    /// `cutoff`. A message relayed after the reaper's scan keeps it alive.
    pub fn end_session_if_idle(
        &self,
        id: SessionId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_tx(|tx| {
            let still_idle: bool = tx.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM sessions
                    WHERE id = ?1 AND status = 'active' AND last_activity < ?2
                 )",
                params![id, to_millis(cutoff)],
                |r| r.get(0),
            )?;
            if !still_idle {
                return Ok(false);
            }
            end_session(tx, id, SessionStatus::Ended, now)
        })
    }

    pub fn touch_session(&self, id: SessionId, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET last_activity = MAX(last_activity, ?2)
                 WHERE id = ?1 AND status = 'active'",
                params![id, to_millis(now)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Active sessions whose last activity is older than `cutoff`.
    pub fn idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions
                 WHERE status = 'active' AND last_activity < ?1
                 ORDER BY last_activity ASC",
                SESSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([to_millis(cutoff)], SessionRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Void a freshly created session whose match notice never arrived.
    /// Refunds the match cost to both participants when the session was
    /// still active; returns whether anything was undone.
    pub fn void_session(&self, id: SessionId, refund: i64, now: DateTime<Utc>) -> Result<bool> {
        let starting = self.starting_credits();
        self.with_tx(|tx| {
            let Some(session) = query_session(tx, id)? else {
                return Ok(false);
            };
            if !end_session(tx, id, SessionStatus::Cancelled, now)? {
                return Ok(false);
            }
            if refund > 0 {
                users::credit(tx, session.user_a, refund, starting, now)?;
                users::credit(tx, session.user_b, refund, starting, now)?;
            }
            Ok(true)
        })
    }
}

pub fn insert_session(
    conn: &Connection,
    a: UserId,
    b: UserId,
    now: DateTime<Utc>,
) -> Result<SessionId> {
    let ts = to_millis(now);
    conn.execute(
        "INSERT INTO sessions (user_a, user_b, started_at, last_activity, status)
         VALUES (?1, ?2, ?3, ?3, 'active')",
        params![a, b, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn query_session(conn: &Connection, id: SessionId) -> Result<Option<SessionRow>> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
    let row = conn.query_row(&sql, [id], SessionRow::from_row).optional()?;
    Ok(row)
}

pub fn active_session_for(conn: &Connection, user: UserId) -> Result<Option<SessionRow>> {
    let sql = format!(
        "SELECT {} FROM sessions
         WHERE status = 'active' AND (user_a = ?1 OR user_b = ?1)
         ORDER BY id DESC
         LIMIT 1",
        SESSION_COLUMNS
    );
    let row = conn.query_row(&sql, [user], SessionRow::from_row).optional()?;
    Ok(row)
}

pub fn active_session_between(
    conn: &Connection,
    a: UserId,
    b: UserId,
) -> Result<Option<SessionRow>> {
    let sql = format!(
        "SELECT {} FROM sessions
         WHERE status = 'active'
           AND ((user_a = ?1 AND user_b = ?2) OR (user_a = ?2 AND user_b = ?1))
         LIMIT 1",
        SESSION_COLUMNS
    );
    let row = conn.query_row(&sql, params![a, b], SessionRow::from_row).optional()?;
    Ok(row)
}

pub fn end_session_between(
    conn: &Connection,
    a: UserId,
    b: UserId,
    now: DateTime<Utc>,
) -> Result<Option<SessionId>> {
    let Some(session) = active_session_between(conn, a, b)? else {
        return Ok(None);
    };
    end_session(conn, session.id, SessionStatus::Ended, now)?;
    Ok(Some(session.id))
}

/// Close an active session with `status` and release the pair.
/// Returns `false` without touching anything if it was not active.
pub fn end_session(
    conn: &Connection,
    id: SessionId,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sessions SET status = ?2, ended_at = ?3 WHERE id = ?1 AND status = 'active'",
        params![id, status.as_str(), to_millis(now)],
    )?;
    if changed == 0 {
        return Ok(false);
    }

    let (a, b): (UserId, UserId) = conn.query_row(
        "SELECT user_a, user_b FROM sessions WHERE id = ?1",
        [id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    users::release_pair(conn, a, b)?;
    Ok(true)
}

/// Close every active session `user` still appears in. Used right before a
/// new pairing, when the directory says the user is not chatting.
pub fn close_active_for(conn: &Connection, user: UserId, now: DateTime<Utc>) -> Result<usize> {
    let closed = conn.execute(
        "UPDATE sessions SET status = 'ended', ended_at = ?2
         WHERE status = 'active' AND (user_a = ?1 OR user_b = ?1)",
        params![user, to_millis(now)],
    )?;
    if closed > 0 {
        warn!("Closed {} stale active session(s) for user {}", closed, user);
    }
    Ok(closed)
}
