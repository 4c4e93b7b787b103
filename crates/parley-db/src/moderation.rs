use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use parley_types::models::{SessionId, UserId};

use crate::models::ReportRow;
use crate::{Database, sessions, to_millis, users};

impl Database {
    /// Record a directed block. Self-blocks and repeats are ignored.
    pub fn block(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| insert_block(conn, blocker, blocked, Utc::now()))
    }

    pub fn is_blocked(&self, a: UserId, b: UserId) -> Result<bool> {
        self.with_conn(|conn| is_blocked(conn, a, b))
    }

    /// Block `target` and end the session the two share, in one transaction.
    pub fn block_and_end(
        &self,
        user: UserId,
        target: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionId>> {
        self.with_tx(|tx| {
            insert_block(tx, user, target, now)?;

            let ended = sessions::end_session_between(tx, user, target, now)?;
            // directory wins: undo a pairing even if its session is gone
            users::release_pair(tx, user, target)?;
            Ok(ended)
        })
    }

    pub fn report(&self, reporter: UserId, reported: UserId, reason: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reports (reporter_id, reported_id, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![reporter, reported, reason, to_millis(Utc::now())],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest reports filed against `user`, for moderators.
    pub fn reports_against(&self, user: UserId, limit: u32) -> Result<Vec<ReportRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, reporter_id, reported_id, reason, created_at
                 FROM reports
                 WHERE reported_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![user, limit], |row| {
                    Ok(ReportRow {
                        id: row.get(0)?,
                        reporter_id: row.get(1)?,
                        reported_id: row.get(2)?,
                        reason: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub fn insert_block(
    conn: &Connection,
    blocker: UserId,
    blocked: UserId,
    now: DateTime<Utc>,
) -> Result<bool> {
    if blocker == blocked {
        return Ok(false);
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
        params![blocker, blocked, to_millis(now)],
    )?;
    Ok(inserted == 1)
}

pub fn is_blocked(conn: &Connection, a: UserId, b: UserId) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (
            SELECT 1 FROM blocks
            WHERE (blocker_id = ?1 AND blocked_id = ?2)
               OR (blocker_id = ?2 AND blocked_id = ?1)
         )",
        params![a, b],
        |r| r.get(0),
    )?;
    Ok(found)
}
