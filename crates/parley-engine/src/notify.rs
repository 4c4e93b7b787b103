use async_trait::async_trait;

use parley_types::events::PairingEvent;
use parley_types::models::UserId;

/// Delivery seam towards the chat platform.
///
/// `notify` reports whether the event reached the user. A `false` for a
/// match notice makes the engine void the match.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: UserId, event: PairingEvent) -> bool;
}
