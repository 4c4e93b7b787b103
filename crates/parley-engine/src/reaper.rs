use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::matcher::Matchmaker;

/// Background task that ends sessions nobody has written in for too long.
///
/// Each tick ends every active session idle past the configured timeout and
/// tells both participants. Errors are logged and the next tick retries.
pub async fn run_reaper_loop(matchmaker: Matchmaker, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match matchmaker.reap_idle_sessions(Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Reaper: ended {} idle sessions", count);
                }
            }
            Err(e) => {
                warn!("Reaper error: {}", e);
            }
        }
    }
}
