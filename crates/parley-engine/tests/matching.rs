mod common;

use std::collections::HashSet;

use chrono::{Duration, Utc};

use common::{Harness, harness, harness_with};
use parley_db::Database;
use parley_engine::{EngineConfig, EngineError, Relay, rescan_once};
use parley_types::events::PairingEvent;
use parley_types::models::{MatchFilter, MatchOutcome, UserId, UserStatus};

/// Directory and registry must agree for every user in `ids`.
fn assert_consistent(db: &Database, ids: impl IntoIterator<Item = UserId>) {
    for id in ids {
        let Some(row) = db.get_user(id).unwrap() else {
            continue;
        };
        assert!(row.credits >= 0, "user {} overdrawn", id);

        let session = db.active_session_for(id).unwrap();
        if row.is(UserStatus::Chatting) {
            let partner = row.partner_id.expect("chatting without partner");
            let other = db.get_user(partner).unwrap().unwrap();
            assert_eq!(other.partner_id, Some(id), "partner pointers disagree");
            let session = session.expect("chatting without active session");
            assert!(session.user_a == partner || session.user_b == partner);
        } else {
            assert_eq!(row.partner_id, None);
            assert!(session.is_none(), "user {} idle with active session", id);
        }
    }
}

async fn pair(h: &Harness, a: UserId, b: UserId) -> i64 {
    h.matchmaker.enqueue_search(b, MatchFilter::any()).await.unwrap();
    let (partner, session) = h
        .matchmaker
        .enqueue_search(a, MatchFilter::any())
        .await
        .unwrap()
        .pairing()
        .unwrap();
    assert_eq!(partner, b);
    session
}

#[tokio::test]
async fn two_searchers_are_paired_and_charged() {
    let h = harness();

    assert_eq!(
        h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap(),
        MatchOutcome::Queued
    );
    let outcome = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    let (partner, session) = outcome.pairing().unwrap();
    assert_eq!(partner, 2);

    assert_eq!(h.db.balance(1).unwrap(), 9);
    assert_eq!(h.db.balance(2).unwrap(), 9);
    for id in [1, 2] {
        assert_eq!(
            h.notifier.events_for(id),
            vec![PairingEvent::Matched { session_id: session }]
        );
    }
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test]
async fn queue_is_served_oldest_first() {
    let h = harness();
    // neither has a city, so their own filters keep them apart
    for id in [10, 11] {
        let outcome = h
            .matchmaker
            .enqueue_search(id, MatchFilter::any().city("Kerman"))
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Queued);
    }

    let first = h.matchmaker.enqueue_search(12, MatchFilter::any()).await.unwrap();
    assert_eq!(first.pairing().map(|(p, _)| p), Some(10));
    assert!(h.db.get_user(11).unwrap().unwrap().is(UserStatus::Searching));

    let second = h.matchmaker.enqueue_search(13, MatchFilter::any()).await.unwrap();
    assert_eq!(second.pairing().map(|(p, _)| p), Some(11));
}

#[tokio::test]
async fn requester_gets_the_longest_waiting_candidate() {
    let h = harness();
    // 1, 2 and 3 wait with open filters; nobody has asked for a match yet
    for id in [1, 2, 3] {
        h.db.ensure_user(id, None).unwrap();
        h.db.with_tx(|tx| parley_db::users::mark_searching(tx, id, &MatchFilter::any()))
            .unwrap();
    }

    let (partner, _) = h
        .matchmaker
        .enqueue_search(4, MatchFilter::any())
        .await
        .unwrap()
        .pairing()
        .unwrap();
    assert_eq!(partner, 1);

    let (partner, _) = h
        .matchmaker
        .enqueue_search(5, MatchFilter::any())
        .await
        .unwrap()
        .pairing()
        .unwrap();
    assert_eq!(partner, 2);
    assert_eq!(h.matchmaker.list_waiting(10).await.unwrap()[0].user_id, 3);
    assert_consistent(&h.db, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn last_credits_pay_for_a_filtered_match() {
    let h = harness_with(EngineConfig {
        starting_credits: 1,
        ..Default::default()
    });
    for id in [1, 2] {
        h.matchmaker
            .update_profile(
                id,
                parley_db::users::ProfileUpdate {
                    province: Some("Tehran".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let first = h
        .matchmaker
        .enqueue_search(2, MatchFilter::any().province("Tehran"))
        .await
        .unwrap();
    assert_eq!(first, MatchOutcome::Queued);
    let second = h
        .matchmaker
        .enqueue_search(1, MatchFilter::any().province("Tehran"))
        .await
        .unwrap();
    assert_eq!(second.pairing().map(|(p, _)| p), Some(2));

    for id in [1, 2] {
        let (user, session) = h.matchmaker.user_state(id).await.unwrap().unwrap();
        assert_eq!(user.credits, 0);
        assert_eq!(user.status, UserStatus::Chatting);
        assert!(session.is_some());
    }
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test]
async fn searching_twice_does_not_self_match() {
    let h = harness();
    h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    let again = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    assert_eq!(again, MatchOutcome::Queued);
    assert_eq!(h.db.balance(1).unwrap(), 10);
}

#[tokio::test]
async fn broke_user_cannot_search() {
    let h = harness_with(EngineConfig {
        starting_credits: 0,
        ..Default::default()
    });
    h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap();
    let outcome = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    assert_eq!(outcome, MatchOutcome::InsufficientCredit);
    assert!(h.db.get_user(1).unwrap().unwrap().is(UserStatus::Idle));

    h.matchmaker.grant_credits(1, 3).await.unwrap();
    h.matchmaker.grant_credits(2, 1).await.unwrap();
    h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap();
    assert!(h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap().pairing().is_some());
    assert_eq!(h.db.balance(2).unwrap(), 0);
}

#[tokio::test]
async fn chatting_user_search_is_rejected() {
    let h = harness();
    pair(&h, 1, 2).await;
    h.matchmaker.enqueue_search(3, MatchFilter::any()).await.unwrap();

    let outcome = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    assert_eq!(outcome, MatchOutcome::AlreadyChatting);
    assert!(h.db.get_user(3).unwrap().unwrap().is(UserStatus::Searching));
    assert_consistent(&h.db, [1, 2, 3]);
}

#[tokio::test]
async fn filters_restrict_candidates() {
    let h = harness();
    h.matchmaker
        .update_profile(
            2,
            parley_db::users::ProfileUpdate {
                gender: Some("f".into()),
                city: Some("Isfahan".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap();

    let miss = h
        .matchmaker
        .enqueue_search(1, MatchFilter::any().gender("m"))
        .await
        .unwrap();
    assert_eq!(miss, MatchOutcome::Queued);

    let hit = h
        .matchmaker
        .enqueue_search(3, MatchFilter::any().gender(" f ").city("Isfahan"))
        .await
        .unwrap();
    assert_eq!(hit.pairing().map(|(p, _)| p), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_never_double_book() {
    let h = harness();
    let users: Vec<UserId> = (1..=40).collect();

    let mut handles = Vec::new();
    for &id in &users {
        let mm = h.matchmaker.clone();
        handles.push(tokio::spawn(async move {
            mm.enqueue_search(id, MatchFilter::any()).await
        }));
    }

    let mut sessions = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if let Some((_, session)) = outcome.pairing() {
            assert!(sessions.insert(session), "session reported twice");
        }
    }

    // every requester that matched took exactly one partner
    assert_eq!(h.db.searching_count().unwrap() as usize, users.len() - 2 * sessions.len());
    assert!(h.db.searching_count().unwrap() <= 1);
    assert_consistent(&h.db, users.iter().copied());

    let spent: i64 = users.iter().map(|&id| 10 - h.db.balance(id).unwrap()).sum();
    assert_eq!(spent as usize, 2 * sessions.len());
}

#[tokio::test]
async fn end_chat_is_idempotent_and_notifies_partner() {
    let h = harness();
    let session = pair(&h, 1, 2).await;

    assert_eq!(h.matchmaker.end_chat(1).await.unwrap(), Some(session));
    assert_eq!(h.matchmaker.end_chat(1).await.unwrap(), None);
    assert_eq!(h.matchmaker.end_chat(2).await.unwrap(), None);

    assert!(h
        .notifier
        .events_for(2)
        .contains(&PairingEvent::PartnerLeft { session_id: Some(session) }));
    assert!(!h
        .notifier
        .events_for(1)
        .contains(&PairingEvent::PartnerLeft { session_id: Some(session) }));
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test]
async fn end_chat_without_session_row_still_tells_the_partner() {
    let h = harness();
    let session = pair(&h, 1, 2).await;
    h.db.with_conn_mut(|conn| {
        conn.execute("UPDATE sessions SET status = 'ended' WHERE id = ?1", [session])?;
        Ok(())
    })
    .unwrap();

    assert_eq!(h.matchmaker.end_chat(1).await.unwrap(), None);
    assert!(h
        .notifier
        .events_for(2)
        .contains(&PairingEvent::PartnerLeft { session_id: None }));
    assert_eq!(h.matchmaker.end_chat(2).await.unwrap(), None);
    assert_eq!(
        h.notifier
            .events_for(2)
            .iter()
            .filter(|e| matches!(e, PairingEvent::PartnerLeft { .. }))
            .count(),
        1
    );
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test]
async fn cancel_search_only_leaves_the_pool() {
    let h = harness();
    assert!(!h.matchmaker.cancel_search(1).await.unwrap());

    h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    assert!(h.matchmaker.cancel_search(1).await.unwrap());
    assert!(!h.matchmaker.cancel_search(1).await.unwrap());

    pair(&h, 3, 4).await;
    assert!(!h.matchmaker.cancel_search(3).await.unwrap());
    assert!(h.db.get_user(3).unwrap().unwrap().is(UserStatus::Chatting));
}

#[tokio::test]
async fn undelivered_match_is_voided_and_refunded() {
    let h = harness();
    h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap();
    h.notifier.cut_off(2);

    let outcome = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    let MatchOutcome::Cancelled { session_id } = outcome else {
        panic!("expected a voided match, got {:?}", outcome);
    };

    for id in [1, 2] {
        let row = h.db.get_user(id).unwrap().unwrap();
        assert!(row.is(UserStatus::Idle));
        assert_eq!(row.credits, 10);
    }
    let session = h.db.get_session(session_id).unwrap().unwrap();
    assert_eq!(session.status, "cancelled");
    assert_eq!(
        h.notifier.events_for(1),
        vec![
            PairingEvent::Matched { session_id },
            PairingEvent::MatchCancelled { session_id },
        ]
    );
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test]
async fn void_without_refund_keeps_the_charge() {
    let h = harness_with(EngineConfig {
        refund_on_cancel: false,
        ..Default::default()
    });
    h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap();
    h.notifier.cut_off(1);

    let outcome = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    assert!(matches!(outcome, MatchOutcome::Cancelled { .. }));
    assert_eq!(h.db.balance(1).unwrap(), 9);
    assert_eq!(h.db.balance(2).unwrap(), 9);
}

#[tokio::test]
async fn block_ends_session_and_prevents_rematch() {
    let h = harness();
    let session = pair(&h, 1, 2).await;

    assert!(matches!(
        h.matchmaker.block_and_end(1, 1).await,
        Err(EngineError::Invalid(_))
    ));
    assert_eq!(h.matchmaker.block_and_end(1, 2).await.unwrap(), Some(session));
    assert!(h
        .notifier
        .events_for(2)
        .contains(&PairingEvent::PartnerLeft { session_id: Some(session) }));

    h.matchmaker.enqueue_search(2, MatchFilter::any()).await.unwrap();
    let outcome = h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    assert_eq!(outcome, MatchOutcome::Queued);

    assert_eq!(h.matchmaker.prepare_relay(1).await.unwrap(), Relay::Rejected("not chatting"));
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test]
async fn relay_requires_live_pairing_and_touches_session() {
    let h = harness();
    assert_eq!(h.matchmaker.prepare_relay(1).await.unwrap(), Relay::Rejected("not chatting"));

    let session = pair(&h, 1, 2).await;
    assert_eq!(
        h.matchmaker.prepare_relay(2).await.unwrap(),
        Relay::Deliver {
            partner_id: 1,
            session_id: session,
        }
    );
    assert!(h.matchmaker.touch(session).await.unwrap());

    h.matchmaker.end_chat(2).await.unwrap();
    assert!(!h.matchmaker.touch(session).await.unwrap());
}

#[tokio::test]
async fn reaper_ends_only_idle_sessions() {
    let h = harness();
    let stale = pair(&h, 1, 2).await;
    let fresh = pair(&h, 3, 4).await;

    let later = Utc::now() + Duration::hours(2);
    h.matchmaker.touch(fresh).await.unwrap();
    h.db.touch_session(fresh, later).unwrap();

    assert_eq!(h.matchmaker.reap_idle_sessions(later).await.unwrap(), 1);
    assert_eq!(h.matchmaker.reap_idle_sessions(later).await.unwrap(), 0);

    for id in [1, 2] {
        assert!(h.db.get_user(id).unwrap().unwrap().is(UserStatus::Idle));
        assert!(h
            .notifier
            .events_for(id)
            .contains(&PairingEvent::SessionExpired { session_id: stale }));
    }
    assert!(h.db.get_user(3).unwrap().unwrap().is(UserStatus::Chatting));
    assert_consistent(&h.db, [1, 2, 3, 4]);
}

#[tokio::test]
async fn rescan_pairs_users_left_waiting() {
    let h = harness();
    h.matchmaker.enqueue_search(1, MatchFilter::any()).await.unwrap();
    h.matchmaker.enqueue_search(2, MatchFilter::any().city("Yazd")).await.unwrap();

    // 2's filter rejected 1; once 1's profile fits, a rescan pairs them
    h.db.update_profile(
        1,
        &parley_db::users::ProfileUpdate {
            city: Some("Yazd".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(rescan_once(&h.matchmaker).await.unwrap(), 1);
    assert_eq!(h.matchmaker.searching_count().await.unwrap(), 0);
    assert_eq!(rescan_once(&h.matchmaker).await.unwrap(), 0);
    assert_consistent(&h.db, [1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_a_rescan_stays_cancelled() {
    let h = harness();
    // unmatchable waiters keep the pass busy while the cancel lands
    for id in 1..=5 {
        h.matchmaker
            .enqueue_search(id, MatchFilter::any().city("Nowhere"))
            .await
            .unwrap();
    }

    for me in 100..160 {
        let outcome = h
            .matchmaker
            .enqueue_search(me, MatchFilter::any().city("Nowhere"))
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Queued);

        let rescan = {
            let mm = h.matchmaker.clone();
            tokio::spawn(async move { rescan_once(&mm).await })
        };
        let cancel = {
            let mm = h.matchmaker.clone();
            tokio::spawn(async move { mm.cancel_search(me).await })
        };
        let (rescanned, cancelled) = tokio::join!(rescan, cancel);
        assert_eq!(rescanned.unwrap().unwrap(), 0);
        assert!(cancelled.unwrap().unwrap(), "user {} was not searching", me);

        let row = h.db.get_user(me).unwrap().unwrap();
        assert!(row.is(UserStatus::Idle), "rescan put user {} back in the pool", me);
        assert_eq!(row.queued_seq, None);
    }
    assert_eq!(h.matchmaker.searching_count().await.unwrap(), 5);
}

#[tokio::test]
async fn rescan_reaches_users_past_the_first_page() {
    let h = harness_with(EngineConfig {
        rescan_batch: 10,
        ..Default::default()
    });
    for id in 1..=25 {
        h.matchmaker
            .enqueue_search(id, MatchFilter::any().city(format!("Nowhere-{}", id)))
            .await
            .unwrap();
    }
    for id in [100, 101] {
        let outcome = h
            .matchmaker
            .enqueue_search(id, MatchFilter::any().city("Yazd"))
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Queued);
    }
    for id in [100, 101] {
        h.db.update_profile(
            id,
            &parley_db::users::ProfileUpdate {
                city: Some("Yazd".into()),
                ..Default::default()
            },
        )
        .unwrap();
    }

    assert_eq!(rescan_once(&h.matchmaker).await.unwrap(), 1);
    let row = h.db.get_user(100).unwrap().unwrap();
    assert!(row.is(UserStatus::Chatting));
    assert_eq!(row.partner_id, Some(101));
    assert_eq!(h.matchmaker.searching_count().await.unwrap(), 25);
    assert_consistent(&h.db, [100, 101]);
}

#[tokio::test]
async fn reports_are_listed_per_user() {
    let h = harness();
    h.matchmaker.report_user(1, 2, "  spam ").await.unwrap();
    h.matchmaker.report_user(3, 2, "").await.unwrap();

    let reports = h.matchmaker.reports_against(2, 10).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().any(|r| r.reason == "spam"));
    assert!(h.matchmaker.reports_against(1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn grant_rejects_non_positive_amounts() {
    let h = harness();
    assert!(matches!(
        h.matchmaker.grant_credits(1, 0).await,
        Err(EngineError::Invalid(_))
    ));
    assert_eq!(h.matchmaker.grant_credits(1, 5).await.unwrap(), 15);
}
