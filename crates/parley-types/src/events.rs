use serde::{Deserialize, Serialize};

use crate::models::{RequestId, SessionId, UserId};

/// Events pushed to a user over the gateway.
///
/// Partners stay anonymous: no event carries the other participant's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PairingEvent {
    /// Server confirms the connection is bound to this user
    Ready { user_id: UserId },

    /// A partner was found and the session is open
    Matched { session_id: SessionId },

    /// The match was voided before it started; the credit was refunded
    MatchCancelled { session_id: SessionId },

    /// The partner ended the chat or blocked this user. `None` when the
    /// pairing had no live session row.
    PartnerLeft { session_id: Option<SessionId> },

    /// Someone browsing the waiting list wants to chat
    ChatRequested { request_id: RequestId },

    /// A chat request this user sent was declined
    RequestDeclined { request_id: RequestId },

    /// The session was closed for inactivity
    SessionExpired { session_id: SessionId },

    /// Chat text relayed from the partner
    Message {
        text: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A relay attempt was refused (not chatting, or the pair is blocked)
    RelayRejected { reason: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Bind the connection to a user id
    Identify { user_id: UserId },

    /// Send chat text to the current partner
    Say { text: String },
}
