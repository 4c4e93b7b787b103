use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::matcher::Matchmaker;

/// Background task that retries users left waiting in the pool.
///
/// A search that found nobody stays queued; this loop gives it another
/// chance once new users have arrived, oldest first.
pub async fn run_rescan_loop(matchmaker: Matchmaker, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match rescan_once(&matchmaker).await {
            Ok(count) => {
                if count > 0 {
                    info!("Rescan: paired {} waiting users", count);
                }
            }
            Err(e) => {
                warn!("Rescan error: {}", e);
            }
        }
    }
}

/// One pass over the whole pool, oldest first, `rescan_batch` rows per
/// read. Returns how many users got paired.
///
/// The pass walks `queued_seq` forward with a cursor, so users past the
/// first page get their turn even when the head of the queue never
/// matches. Each retry re-checks the user inside its own transaction.
pub async fn rescan_once(matchmaker: &Matchmaker) -> Result<usize> {
    let batch = matchmaker.config().rescan_batch.max(1);
    let mut cursor = 0;
    let mut paired = 0;

    loop {
        let db = matchmaker.db().clone();
        let page =
            tokio::task::spawn_blocking(move || db.searching_after(cursor, batch)).await??;
        let Some(last) = page.last().and_then(|row| row.queued_seq) else {
            break;
        };

        for row in &page {
            let outcome = matchmaker.retry_search(row.id).await?;
            if outcome.pairing().is_some() {
                debug!("Rescan paired user {}", row.id);
                paired += 1;
            }
            tokio::task::yield_now().await;
        }

        if page.len() < batch as usize {
            break;
        }
        cursor = last;
    }
    Ok(paired)
}
