//! User directory and the credit ledger embedded in it.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use parley_types::models::{MatchFilter, UserId, UserStatus, WaitingUser};

use crate::models::{USER_COLUMNS, UserRow};
use crate::{Database, to_millis};

impl Database {
    // -- Directory --

    /// Create the user with starting credits if absent; returns the current row.
    pub fn ensure_user(&self, id: UserId, username: Option<&str>) -> Result<UserRow> {
        let starting = self.starting_credits();
        self.with_conn_mut(|conn| {
            let row = ensure_user(conn, id, starting, Utc::now())?;
            if let Some(name) = username {
                conn.execute(
                    "UPDATE users SET username = ?2 WHERE id = ?1 AND username IS NULL",
                    params![id, name],
                )?;
                return query_user(conn, id)?.ok_or_else(|| anyhow::anyhow!("user {} vanished", id));
            }
            Ok(row)
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Status and partner pointer, or `None` for an unknown user.
    pub fn status(&self, id: UserId) -> Result<Option<(UserStatus, Option<UserId>)>> {
        self.with_conn(|conn| match query_user(conn, id)? {
            Some(row) => Ok(Some((row.status()?, row.partner_id))),
            None => Ok(None),
        })
    }

    /// Overwrite the supplied profile fields, leaving `None` fields untouched.
    pub fn update_profile(&self, id: UserId, profile: &ProfileUpdate) -> Result<UserRow> {
        let starting = self.starting_credits();
        self.with_tx(|tx| {
            ensure_user(tx, id, starting, Utc::now())?;
            tx.execute(
                "UPDATE users SET
                    username = COALESCE(?2, username),
                    gender   = COALESCE(?3, gender),
                    province = COALESCE(?4, province),
                    city     = COALESCE(?5, city)
                 WHERE id = ?1",
                params![
                    id,
                    profile.username,
                    profile.gender,
                    profile.province,
                    profile.city
                ],
            )?;
            query_user(tx, id)?.ok_or_else(|| anyhow::anyhow!("user {} vanished", id))
        })
    }

    /// Searching users in queue order.
    pub fn list_waiting(&self, limit: u32) -> Result<Vec<WaitingUser>> {
        self.with_conn(|conn| {
            Ok(query_searching(conn, limit)?
                .into_iter()
                .map(UserRow::into_waiting)
                .collect())
        })
    }

    /// Next page of the pool: searching users queued after `after_seq`.
    pub fn searching_after(&self, after_seq: i64, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users
                 WHERE status = 'searching' AND queued_seq > ?1
                 ORDER BY queued_seq ASC, id ASC
                 LIMIT ?2",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![after_seq, limit], UserRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn searching_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM users WHERE status = 'searching'",
                [],
                |r| r.get(0),
            )?)
        })
    }

    /// `searching -> idle`. Any other status is left alone; returns whether
    /// the user was taken out of the pool.
    pub fn cancel_search(&self, id: UserId) -> Result<bool> {
        self.with_tx(|tx| cancel_search(tx, id))
    }

    // -- Credit ledger --

    pub fn credit(&self, id: UserId, amount: i64) -> Result<i64> {
        let starting = self.starting_credits();
        self.with_tx(|tx| credit(tx, id, amount, starting, Utc::now()))
    }

    pub fn debit(&self, id: UserId, amount: i64) -> Result<bool> {
        self.with_tx(|tx| debit(tx, id, amount))
    }

    pub fn balance(&self, id: UserId) -> Result<i64> {
        self.with_conn(|conn| balance(conn, id))
    }
}

/// Profile fields to overwrite; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub gender: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
}

pub fn query_user(conn: &Connection, id: UserId) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let row = conn
        .query_row(&sql, [id], UserRow::from_row)
        .optional()?;
    Ok(row)
}

pub fn ensure_user(
    conn: &Connection,
    id: UserId,
    starting_credits: i64,
    now: DateTime<Utc>,
) -> Result<UserRow> {
    conn.execute(
        "INSERT OR IGNORE INTO users (id, status, credits, created_at) VALUES (?1, 'idle', ?2, ?3)",
        params![id, starting_credits, to_millis(now)],
    )?;
    query_user(conn, id)?.ok_or_else(|| anyhow::anyhow!("user {} missing after insert", id))
}

fn query_searching(conn: &Connection, limit: u32) -> Result<Vec<UserRow>> {
    let sql = format!(
        "SELECT {} FROM users
         WHERE status = 'searching'
         ORDER BY queued_seq ASC, created_at ASC, id ASC
         LIMIT ?1",
        USER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit], UserRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Enter (or stay in) the search pool. A fresh queue position is taken only
/// on entry; a repeated search keeps the original one.
pub fn mark_searching(conn: &Connection, id: UserId, filter: &MatchFilter) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET
            status = 'searching',
            partner_id = NULL,
            queued_seq = CASE
                WHEN status = 'searching' AND queued_seq IS NOT NULL THEN queued_seq
                ELSE (SELECT COALESCE(MAX(queued_seq), 0) + 1 FROM users)
            END,
            search_gender = ?2,
            search_province = ?3,
            search_city = ?4
         WHERE id = ?1",
        params![id, filter.gender, filter.province, filter.city],
    )?;
    if changed != 1 {
        bail!("user {} not found", id);
    }
    Ok(())
}

pub fn mark_idle(conn: &Connection, id: UserId) -> Result<()> {
    conn.execute(
        "UPDATE users SET
            status = 'idle', partner_id = NULL, queued_seq = NULL,
            search_gender = NULL, search_province = NULL, search_city = NULL
         WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// Point `a` and `b` at each other as `chatting`.
pub fn mark_paired(conn: &Connection, a: UserId, b: UserId) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET
            status = 'chatting',
            partner_id = CASE id WHEN ?1 THEN ?2 ELSE ?1 END,
            queued_seq = NULL,
            search_gender = NULL, search_province = NULL, search_city = NULL
         WHERE id IN (?1, ?2)",
        params![a, b],
    )?;
    if changed != 2 {
        bail!("pairing {} <-> {} touched {} rows", a, b, changed);
    }
    Ok(())
}

/// Return both sides of a pair to `idle`, but only the sides that are still
/// chatting with each other. Returns how many users were released.
pub fn release_pair(conn: &Connection, a: UserId, b: UserId) -> Result<usize> {
    let released = conn.execute(
        "UPDATE users SET status = 'idle', partner_id = NULL
         WHERE status = 'chatting'
           AND ((id = ?1 AND partner_id = ?2) OR (id = ?2 AND partner_id = ?1))",
        params![a, b],
    )?;
    Ok(released)
}

pub fn cancel_search(conn: &Connection, id: UserId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET
            status = 'idle', partner_id = NULL, queued_seq = NULL,
            search_gender = NULL, search_province = NULL, search_city = NULL
         WHERE id = ?1 AND status = 'searching'",
        [id],
    )?;
    Ok(changed == 1)
}

/// Add credits, creating the user first if needed. Returns the new balance.
pub fn credit(
    conn: &Connection,
    id: UserId,
    amount: i64,
    starting_credits: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    if amount < 0 {
        bail!("credit amount must be non-negative, got {}", amount);
    }
    ensure_user(conn, id, starting_credits, now)?;
    conn.execute(
        "UPDATE users SET credits = credits + ?2 WHERE id = ?1",
        params![id, amount],
    )?;
    balance(conn, id)
}

/// Subtract `amount` iff the balance covers it. The guard lives in the
/// UPDATE itself, so the check and the write cannot be separated.
pub fn debit(conn: &Connection, id: UserId, amount: i64) -> Result<bool> {
    if amount < 0 {
        bail!("debit amount must be non-negative, got {}", amount);
    }
    let changed = conn.execute(
        "UPDATE users SET credits = credits - ?2 WHERE id = ?1 AND credits >= ?2",
        params![id, amount],
    )?;
    Ok(changed == 1)
}

pub fn balance(conn: &Connection, id: UserId) -> Result<i64> {
    let credits: Option<i64> = conn
        .query_row("SELECT credits FROM users WHERE id = ?1", [id], |r| r.get(0))
        .optional()?;
    Ok(credits.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_STARTING_CREDITS;
    use crate::test_support::open_temp;

    #[test]
    fn ensure_user_creates_with_starting_credits_once() {
        let (db, _dir) = open_temp();

        let row = db.ensure_user(1, Some("ana")).unwrap();
        assert_eq!(row.credits, DEFAULT_STARTING_CREDITS);
        assert!(row.is(UserStatus::Idle));
        assert_eq!(row.username.as_deref(), Some("ana"));

        db.debit(1, 3).unwrap();
        let again = db.ensure_user(1, Some("other")).unwrap();
        assert_eq!(again.credits, DEFAULT_STARTING_CREDITS - 3);
        assert_eq!(again.username.as_deref(), Some("ana"));
    }

    #[test]
    fn debit_never_overdraws() {
        let (db, _dir) = open_temp();
        db.ensure_user(1, None).unwrap();

        assert!(db.debit(1, DEFAULT_STARTING_CREDITS).unwrap());
        assert_eq!(db.balance(1).unwrap(), 0);

        assert!(!db.debit(1, 1).unwrap());
        assert_eq!(db.balance(1).unwrap(), 0);

        assert!(!db.debit(99, 1).unwrap());
        assert!(db.debit(1, -1).is_err());
    }

    #[test]
    fn credit_is_additive_and_creates_missing_users() {
        let (db, _dir) = open_temp();

        assert_eq!(db.credit(5, 5).unwrap(), DEFAULT_STARTING_CREDITS + 5);
        assert_eq!(db.credit(5, 2).unwrap(), DEFAULT_STARTING_CREDITS + 7);
        assert!(db.credit(5, -2).is_err());
        assert_eq!(db.balance(404).unwrap(), 0);
    }

    #[test]
    fn repeated_search_keeps_queue_position() {
        let (db, _dir) = open_temp();
        for id in [1, 2] {
            db.ensure_user(id, None).unwrap();
        }

        db.with_tx(|tx| mark_searching(tx, 1, &MatchFilter::any())).unwrap();
        db.with_tx(|tx| mark_searching(tx, 2, &MatchFilter::any())).unwrap();
        let first = db.get_user(1).unwrap().unwrap().queued_seq;

        db.with_tx(|tx| mark_searching(tx, 1, &MatchFilter::any().city("Shiraz")))
            .unwrap();
        let row = db.get_user(1).unwrap().unwrap();
        assert_eq!(row.queued_seq, first);
        assert_eq!(row.search_filter(), MatchFilter::any().city("Shiraz"));

        let waiting: Vec<_> = db.list_waiting(10).unwrap().into_iter().map(|w| w.user_id).collect();
        assert_eq!(waiting, vec![1, 2]);
        assert_eq!(db.searching_count().unwrap(), 2);

        let after_first: Vec<_> = db
            .searching_after(first.unwrap(), 10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(after_first, vec![2]);
    }

    #[test]
    fn cancel_only_applies_to_searching_users() {
        let (db, _dir) = open_temp();
        for id in [1, 2] {
            db.ensure_user(id, None).unwrap();
        }

        assert!(!db.cancel_search(1).unwrap());

        db.with_tx(|tx| mark_searching(tx, 1, &MatchFilter::any())).unwrap();
        assert!(db.cancel_search(1).unwrap());
        assert!(db.get_user(1).unwrap().unwrap().is(UserStatus::Idle));

        db.with_tx(|tx| mark_paired(tx, 1, 2)).unwrap();
        assert!(!db.cancel_search(1).unwrap());
        assert_eq!(db.status(1).unwrap(), Some((UserStatus::Chatting, Some(2))));
        assert_eq!(db.status(3).unwrap(), None);
    }

    #[test]
    fn release_pair_ignores_users_paired_elsewhere() {
        let (db, _dir) = open_temp();
        for id in [1, 2, 3] {
            db.ensure_user(id, None).unwrap();
        }
        db.with_tx(|tx| mark_paired(tx, 1, 2)).unwrap();

        assert_eq!(db.with_tx(|tx| release_pair(tx, 1, 3)).unwrap(), 0);
        assert_eq!(db.with_tx(|tx| release_pair(tx, 2, 1)).unwrap(), 2);

        let one = db.get_user(1).unwrap().unwrap();
        assert!(one.is(UserStatus::Idle));
        assert_eq!(one.partner_id, None);
    }

    #[test]
    fn profile_update_keeps_unset_fields() {
        let (db, _dir) = open_temp();
        db.update_profile(
            1,
            &ProfileUpdate {
                gender: Some("f".into()),
                province: Some("Fars".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let row = db
            .update_profile(
                1,
                &ProfileUpdate {
                    city: Some("Shiraz".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(row.gender.as_deref(), Some("f"));
        assert_eq!(row.province.as_deref(), Some("Fars"));
        assert_eq!(row.city.as_deref(), Some("Shiraz"));
    }
}
