use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use parley_db::Database;
use parley_db::matching::MATCH_COST;
use parley_db::sessions::ChatEnd;
use parley_db::users::ProfileUpdate;
use parley_types::events::PairingEvent;
use parley_types::models::{
    ChatRequest, MatchFilter, MatchOutcome, Report, RequestId, RequestOutcome, SessionId, User,
    UserId, UserStatus, WaitingUser,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::notify::Notifier;

const MAX_PAGE: u32 = 200;

/// What the relay layer should do with a message from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relay {
    Deliver {
        partner_id: UserId,
        session_id: SessionId,
    },
    Rejected(&'static str),
}

/// Entry point for every pairing operation.
///
/// Cheap to clone; all clones share one store and one notifier. Store work
/// runs on the blocking pool, one transaction per call.
#[derive(Clone)]
pub struct Matchmaker {
    inner: Arc<MatchmakerInner>,
}

struct MatchmakerInner {
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl Matchmaker {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(MatchmakerInner {
                db,
                notifier,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        let out = tokio::task::spawn_blocking(move || f(&db)).await??;
        Ok(out)
    }

    // -- Search --

    /// Put `user` in the pool and try to pair them right away.
    pub async fn enqueue_search(&self, user: UserId, filter: MatchFilter) -> Result<MatchOutcome> {
        let filter = filter.normalized();
        let outcome = self
            .blocking(move |db| db.attempt_match(user, &filter, Utc::now()))
            .await?;

        let MatchOutcome::Matched {
            partner_id,
            session_id,
        } = outcome
        else {
            debug!("Search by {}: {}", user, outcome.label());
            return Ok(outcome);
        };

        info!("Matched {} <-> {} (session {})", user, partner_id, session_id);
        self.announce_match(user, partner_id, session_id).await
    }

    /// Re-attempt a match for a user already in the pool, with the filter
    /// they searched with. A user who left the pool meanwhile stays out.
    pub async fn retry_search(&self, user: UserId) -> Result<MatchOutcome> {
        let outcome = self
            .blocking(move |db| db.retry_match(user, Utc::now()))
            .await?;
        let MatchOutcome::Matched {
            partner_id,
            session_id,
        } = outcome
        else {
            return Ok(outcome);
        };

        info!("Rescan matched {} <-> {} (session {})", user, partner_id, session_id);
        self.announce_match(user, partner_id, session_id).await
    }

    /// Tell both sides about a committed match; void it if either misses out.
    async fn announce_match(
        &self,
        user: UserId,
        partner_id: UserId,
        session_id: SessionId,
    ) -> Result<MatchOutcome> {
        let notifier = &self.inner.notifier;
        let (me_ok, partner_ok) = tokio::join!(
            notifier.notify(user, PairingEvent::Matched { session_id }),
            notifier.notify(partner_id, PairingEvent::Matched { session_id }),
        );
        if me_ok && partner_ok {
            return Ok(MatchOutcome::Matched {
                partner_id,
                session_id,
            });
        }

        warn!(
            "Match notice for session {} not delivered (requester: {}, partner: {}); voiding",
            session_id, me_ok, partner_ok
        );
        let refund = if self.inner.config.refund_on_cancel {
            MATCH_COST
        } else {
            0
        };
        let voided = self
            .blocking(move |db| db.void_session(session_id, refund, Utc::now()))
            .await?;
        if !voided {
            // Someone ended it first; their path already released the pair.
            debug!("Session {} was closed before it could be voided", session_id);
            return Ok(MatchOutcome::Cancelled { session_id });
        }

        let cancelled = PairingEvent::MatchCancelled { session_id };
        if me_ok {
            notifier.notify(user, cancelled.clone()).await;
        }
        if partner_ok {
            notifier.notify(partner_id, cancelled).await;
        }
        Ok(MatchOutcome::Cancelled { session_id })
    }

    /// Leave the pool. Only a `searching` user is affected.
    pub async fn cancel_search(&self, user: UserId) -> Result<bool> {
        let cancelled = self.blocking(move |db| db.cancel_search(user)).await?;
        if cancelled {
            debug!("User {} left the search pool", user);
        }
        Ok(cancelled)
    }

    /// Searching users, oldest first, for the browse view.
    pub async fn list_waiting(&self, limit: u32) -> Result<Vec<WaitingUser>> {
        let limit = limit.clamp(1, MAX_PAGE);
        self.blocking(move |db| db.list_waiting(limit)).await
    }

    pub async fn searching_count(&self) -> Result<i64> {
        self.blocking(|db| db.searching_count()).await
    }

    // -- Direct requests --

    /// Ask `target` for a chat. The target hears about it right away; nothing
    /// is charged until they accept.
    pub async fn request_chat(&self, user: UserId, target: UserId) -> Result<RequestOutcome> {
        if user == target {
            return Err(EngineError::Invalid("cannot request a chat with yourself".into()));
        }
        let outcome = self
            .blocking(move |db| db.create_request(user, target, Utc::now()))
            .await?;
        if let RequestOutcome::Sent { request_id } = outcome {
            info!("User {} asked {} for a chat (request {})", user, target, request_id);
            let delivered = self
                .inner
                .notifier
                .notify(target, PairingEvent::ChatRequested { request_id })
                .await;
            if !delivered {
                debug!("Request {} left pending; {} is offline", request_id, target);
            }
        }
        Ok(outcome)
    }

    /// Accept a request addressed to `user`. On success both sides are paired
    /// and told, exactly like a pool match.
    pub async fn accept_request(&self, user: UserId, request_id: RequestId) -> Result<MatchOutcome> {
        let outcome = self
            .blocking(move |db| db.accept_request(request_id, user, Utc::now()))
            .await?;
        let MatchOutcome::Matched {
            partner_id,
            session_id,
        } = outcome
        else {
            debug!("Accept of request {} by {}: {}", request_id, user, outcome.label());
            return Ok(outcome);
        };

        info!(
            "Request {} accepted: {} <-> {} (session {})",
            request_id, user, partner_id, session_id
        );
        self.announce_match(user, partner_id, session_id).await
    }

    /// Decline a request addressed to `user`; the sender is told.
    pub async fn decline_request(&self, user: UserId, request_id: RequestId) -> Result<bool> {
        let sender = self
            .blocking(move |db| db.decline_request(request_id, user, Utc::now()))
            .await?;
        let Some(sender) = sender else {
            return Ok(false);
        };
        debug!("User {} declined request {} from {}", user, request_id, sender);
        self.inner
            .notifier
            .notify(sender, PairingEvent::RequestDeclined { request_id })
            .await;
        Ok(true)
    }

    /// Requests waiting on `user`'s answer, oldest first.
    pub async fn pending_requests(&self, user: UserId, limit: u32) -> Result<Vec<ChatRequest>> {
        let limit = limit.clamp(1, MAX_PAGE);
        let rows = self
            .blocking(move |db| db.pending_requests_for(user, limit))
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.into_request())
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    // -- Sessions --

    /// End the chat `user` is in. Calling it again is a no-op.
    ///
    /// The released partner is told even when the pairing had no live
    /// session row left; the returned id is `None` in that case.
    pub async fn end_chat(&self, user: UserId) -> Result<Option<SessionId>> {
        let ended = self
            .blocking(move |db| db.end_chat_for(user, Utc::now()))
            .await?;
        let Some(ChatEnd {
            partner_id,
            session_id,
        }) = ended
        else {
            return Ok(None);
        };

        match session_id {
            Some(id) => info!("User {} ended session {}", user, id),
            None => info!("User {} left {} (no live session)", user, partner_id),
        }
        self.inner
            .notifier
            .notify(partner_id, PairingEvent::PartnerLeft { session_id })
            .await;
        Ok(session_id)
    }

    /// Record the block, then end whatever session the two share.
    pub async fn block_and_end(&self, user: UserId, target: UserId) -> Result<Option<SessionId>> {
        if user == target {
            return Err(EngineError::Invalid("cannot block yourself".into()));
        }
        let ended = self
            .blocking(move |db| db.block_and_end(user, target, Utc::now()))
            .await?;
        info!("User {} blocked {}", user, target);
        if let Some(session_id) = ended {
            self.inner
                .notifier
                .notify(
                    target,
                    PairingEvent::PartnerLeft {
                        session_id: Some(session_id),
                    },
                )
                .await;
        }
        Ok(ended)
    }

    /// Record activity on a session. Called by the relay for every message.
    pub async fn touch(&self, session_id: SessionId) -> Result<bool> {
        self.blocking(move |db| db.touch_session(session_id, Utc::now()))
            .await
    }

    /// Decide whether `user` may send to a partner right now.
    pub async fn prepare_relay(&self, user: UserId) -> Result<Relay> {
        self.blocking(move |db| {
            let Some((UserStatus::Chatting, Some(partner_id))) = db.status(user)? else {
                return Ok(Relay::Rejected("not chatting"));
            };
            if db.is_blocked(user, partner_id)? {
                return Ok(Relay::Rejected("blocked"));
            }
            let Some(session) = db.active_session_for(user)? else {
                return Ok(Relay::Rejected("no active session"));
            };
            Ok(Relay::Deliver {
                partner_id,
                session_id: session.id,
            })
        })
        .await
    }

    /// End every session idle since before `now - session_idle_timeout`.
    pub async fn reap_idle_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.inner.config.session_idle_timeout)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let cutoff = now - timeout;

        let stale = self.blocking(move |db| db.idle_sessions(cutoff)).await?;
        let mut ended = 0;
        for session in stale {
            let id = session.id;
            // touched or ended since the scan: left alone
            let closed = self
                .blocking(move |db| db.end_session_if_idle(id, cutoff, now))
                .await?;
            if !closed {
                continue;
            }
            ended += 1;
            for participant in [session.user_a, session.user_b] {
                self.inner
                    .notifier
                    .notify(participant, PairingEvent::SessionExpired { session_id: id })
                    .await;
            }
        }
        Ok(ended)
    }

    // -- Moderation --

    pub async fn report_user(&self, reporter: UserId, reported: UserId, reason: &str) -> Result<i64> {
        let reason = reason.trim().to_string();
        let id = self
            .blocking(move |db| db.report(reporter, reported, &reason))
            .await?;
        info!("User {} reported {} (report {})", reporter, reported, id);
        Ok(id)
    }

    pub async fn reports_against(&self, user: UserId, limit: u32) -> Result<Vec<Report>> {
        let limit = limit.clamp(1, MAX_PAGE);
        let rows = self
            .blocking(move |db| db.reports_against(user, limit))
            .await?;
        Ok(rows.into_iter().map(|r| r.into_report()).collect())
    }

    // -- Directory / ledger --

    pub async fn ensure_user(&self, user: UserId, username: Option<String>) -> Result<User> {
        let row = self
            .blocking(move |db| db.ensure_user(user, username.as_deref()))
            .await?;
        Ok(row.into_user()?)
    }

    pub async fn update_profile(&self, user: UserId, profile: ProfileUpdate) -> Result<User> {
        let row = self
            .blocking(move |db| db.update_profile(user, &profile))
            .await?;
        Ok(row.into_user()?)
    }

    /// The user and their active session, if the user exists.
    pub async fn user_state(&self, user: UserId) -> Result<Option<(User, Option<SessionId>)>> {
        self.blocking(move |db| {
            let Some(row) = db.get_user(user)? else {
                return Ok(None);
            };
            let session = db.active_session_for(user)?.map(|s| s.id);
            Ok(Some((row.into_user()?, session)))
        })
        .await
    }

    /// Top up a balance (invite rewards, purchases). Returns the new balance.
    pub async fn grant_credits(&self, user: UserId, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(EngineError::Invalid(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        let balance = self.blocking(move |db| db.credit(user, amount)).await?;
        info!("Granted {} credits to {} (balance {})", amount, user, balance);
        Ok(balance)
    }
}
