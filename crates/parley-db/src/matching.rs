//! The matching transaction.
//!
//! The search pool is not a separate queue: it is every user row with
//! `status = 'searching'`, read in `queued_seq` order. Atomicity comes from
//! running the whole attempt inside one IMMEDIATE writer transaction.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params_from_iter};
use tracing::debug;

use parley_types::models::{
    MatchFilter, MatchOutcome, ProfileField, SessionId, UserId, UserStatus,
};

use crate::models::{USER_COLUMNS, UserRow};
use crate::{Database, sessions, users};

/// Credits one successful match costs each participant.
pub const MATCH_COST: i64 = 1;

/// Eligibility rule for a candidate row, rendered to one SQL clause.
///
/// New filter dimensions only need a column in [`column_for`]; the locking
/// and transaction code never looks at individual dimensions.
#[derive(Debug, Clone)]
pub struct CandidatePredicate<'a> {
    requester: UserId,
    filter: &'a MatchFilter,
}

impl<'a> CandidatePredicate<'a> {
    pub fn new(requester: UserId, filter: &'a MatchFilter) -> Self {
        Self { requester, filter }
    }

    /// `WHERE` body plus its positional parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = vec![
            "status = 'searching'".to_string(),
            "id <> ?1".to_string(),
            // blocks count in either direction
            "NOT EXISTS (SELECT 1 FROM blocks b
                WHERE (b.blocker_id = ?1 AND b.blocked_id = users.id)
                   OR (b.blocker_id = users.id AND b.blocked_id = ?1))"
                .to_string(),
        ];
        let mut params = vec![Value::Integer(self.requester)];

        for (field, value) in self.filter.constraints() {
            params.push(Value::Text(value.to_string()));
            clauses.push(format!("{} = ?{}", column_for(field), params.len()));
        }

        (clauses.join(" AND "), params)
    }
}

fn column_for(field: ProfileField) -> &'static str {
    match field {
        ProfileField::Gender => "gender",
        ProfileField::Province => "province",
        ProfileField::City => "city",
    }
}

/// Select and claim the oldest eligible waiting candidate.
///
/// Takes a `Transaction` so the read can only happen while the writer lock is
/// held: the returned row belongs to this transaction until it commits, and a
/// row claimed by another in-flight attempt is never visible here. That is the
/// single-writer form of `FOR UPDATE SKIP LOCKED`: nobody waits on a
/// contended candidate, it just is not offered.
pub fn lock_one_candidate(
    tx: &Transaction<'_>,
    predicate: &CandidatePredicate<'_>,
) -> Result<Option<UserRow>> {
    let (clause, params) = predicate.to_sql();
    let sql = format!(
        "SELECT {} FROM users
         WHERE {}
         ORDER BY queued_seq ASC, created_at ASC, id ASC
         LIMIT 1",
        USER_COLUMNS, clause
    );
    let row = tx
        .query_row(&sql, params_from_iter(params), UserRow::from_row)
        .optional()?;
    Ok(row)
}

/// One matching attempt for `requester`. Every path that returns `Ok` is
/// committed by the caller; every `Err` rolls the whole attempt back.
pub fn attempt_match(
    tx: &Transaction<'_>,
    requester: UserId,
    filter: &MatchFilter,
    starting_credits: i64,
    now: DateTime<Utc>,
) -> Result<MatchOutcome> {
    let me = users::ensure_user(tx, requester, starting_credits, now)?;

    if me.credits < MATCH_COST {
        return Ok(MatchOutcome::InsufficientCredit);
    }
    if me.is(UserStatus::Chatting) {
        return Ok(MatchOutcome::AlreadyChatting);
    }

    users::mark_searching(tx, requester, filter)?;

    let predicate = CandidatePredicate::new(requester, filter);
    let Some(candidate) = lock_one_candidate(tx, &predicate)? else {
        debug!("No candidate for {}; left in pool", requester);
        return Ok(MatchOutcome::Queued);
    };

    // Balances may have moved since the first read.
    let my_credits = users::balance(tx, requester)?;
    let their_credits = users::balance(tx, candidate.id)?;
    if my_credits < MATCH_COST || their_credits < MATCH_COST {
        debug!(
            "Match {} <-> {} dropped: credits {} / {}",
            requester, candidate.id, my_credits, their_credits
        );
        users::mark_idle(tx, requester)?;
        users::mark_idle(tx, candidate.id)?;
        return Ok(MatchOutcome::InsufficientCredit);
    }

    let session_id = pair_users(tx, requester, candidate.id, now)?;
    Ok(MatchOutcome::Matched {
        partner_id: candidate.id,
        session_id,
    })
}

/// Retry matching for a user already in the pool, with the filter they
/// joined with. A user who left the pool meanwhile is not put back.
pub fn retry_match(
    tx: &Transaction<'_>,
    requester: UserId,
    starting_credits: i64,
    now: DateTime<Utc>,
) -> Result<MatchOutcome> {
    let Some(me) = users::query_user(tx, requester)? else {
        return Ok(MatchOutcome::NotSearching);
    };
    if !me.is(UserStatus::Searching) {
        return Ok(MatchOutcome::NotSearching);
    }
    attempt_match(tx, requester, &me.search_filter(), starting_credits, now)
}

/// Charge both users, point them at each other and open the session.
/// Callers have already checked both balances inside the same transaction.
pub(crate) fn pair_users(
    conn: &Connection,
    a: UserId,
    b: UserId,
    now: DateTime<Utc>,
) -> Result<SessionId> {
    if !users::debit(conn, a, MATCH_COST)? || !users::debit(conn, b, MATCH_COST)? {
        bail!("guarded debit failed for {} <-> {}", a, b);
    }

    users::mark_paired(conn, a, b)?;

    sessions::close_active_for(conn, a, now)?;
    sessions::close_active_for(conn, b, now)?;
    sessions::insert_session(conn, a, b, now)
}

impl Database {
    pub fn attempt_match(
        &self,
        requester: UserId,
        filter: &MatchFilter,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome> {
        let starting = self.starting_credits();
        self.with_tx(|tx| attempt_match(tx, requester, filter, starting, now))
    }

    pub fn retry_match(&self, requester: UserId, now: DateTime<Utc>) -> Result<MatchOutcome> {
        let starting = self.starting_credits();
        self.with_tx(|tx| retry_match(tx, requester, starting, now))
    }
}
