use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use parley_engine::{Matchmaker, Relay};
use parley_types::events::{GatewayCommand, PairingEvent};
use parley_types::models::UserId;

use crate::dispatcher::Dispatcher;

/// Server pings every 15 seconds; two missed pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest chat message accepted for relay, in bytes.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Handle one WebSocket connection: Identify handshake, Ready, then the
/// event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, matchmaker: Matchmaker) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = wait_for_identify(&mut receiver).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    if let Err(e) = matchmaker.ensure_user(user_id, None).await {
        warn!("Could not load user {} for gateway: {}", user_id, e);
        return;
    }

    info!("User {} connected to gateway", user_id);

    if !send_event(&mut sender, &PairingEvent::Ready { user_id }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, matchmaker, user_id).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    matchmaker: Matchmaker,
    user_id: UserId,
) {
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // events -> client, plus heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // client commands
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &matchmaker, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "User {} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("User {} disconnected from gateway", user_id);
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>) -> Option<UserId> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { user_id }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return Some(user_id);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    matchmaker: &Matchmaker,
    user_id: UserId,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // already bound

        GatewayCommand::Say { text } => {
            if let Err(reason) = check_text(&text) {
                reject(dispatcher, user_id, reason).await;
                return;
            }
            relay(dispatcher, matchmaker, user_id, text).await;
        }
    }
}

/// Forward chat text to the sender's partner and record the activity.
async fn relay(dispatcher: &Dispatcher, matchmaker: &Matchmaker, user_id: UserId, text: String) {
    let (partner_id, session_id) = match matchmaker.prepare_relay(user_id).await {
        Ok(Relay::Deliver {
            partner_id,
            session_id,
        }) => (partner_id, session_id),
        Ok(Relay::Rejected(reason)) => {
            reject(dispatcher, user_id, reason).await;
            return;
        }
        Err(e) => {
            warn!("Relay check for user {} failed: {}", user_id, e);
            reject(dispatcher, user_id, "temporarily unavailable").await;
            return;
        }
    };

    let event = PairingEvent::Message {
        text,
        timestamp: Utc::now(),
    };
    if !dispatcher.send_to_user(partner_id, event).await {
        debug!("Partner {} of user {} is offline", partner_id, user_id);
        reject(dispatcher, user_id, "partner offline").await;
        return;
    }

    if let Err(e) = matchmaker.touch(session_id).await {
        warn!("Failed to touch session {}: {}", session_id, e);
    }
}

async fn reject(dispatcher: &Dispatcher, user_id: UserId, reason: &str) {
    dispatcher
        .send_to_user(
            user_id,
            PairingEvent::RelayRejected {
                reason: reason.to_string(),
            },
        )
        .await;
}

fn check_text(text: &str) -> Result<(), &'static str> {
    if text.trim().is_empty() {
        return Err("empty message");
    }
    if text.len() > MAX_MESSAGE_LEN {
        return Err("message too long");
    }
    Ok(())
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &PairingEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
