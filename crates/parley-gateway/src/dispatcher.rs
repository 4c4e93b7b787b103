use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_engine::Notifier;
use parley_types::events::PairingEvent;
use parley_types::models::UserId;

/// Tracks live gateway connections and routes events to them.
///
/// Each user has at most one connection; a newer one replaces the older.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<UserId, (Uuid, mpsc::UnboundedSender<PairingEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a per-user channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: UserId,
    ) -> (Uuid, mpsc::UnboundedReceiver<PairingEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Drop the user's channel, but only if `conn_id` still owns it.
    pub async fn unregister_user_channel(&self, user_id: UserId, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id) {
            channels.remove(&user_id);
        }
    }

    /// Queue an event for the user. `false` if they have no live connection.
    pub async fn send_to_user(&self, user_id: UserId, event: PairingEvent) -> bool {
        let channels = self.inner.user_channels.read().await;
        match channels.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.user_channels.read().await.len()
    }
}

#[async_trait]
impl Notifier for Dispatcher {
    async fn notify(&self, user: UserId, event: PairingEvent) -> bool {
        self.send_to_user(user, event).await
    }
}
