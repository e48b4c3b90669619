//! Conversation push channel.
//!
//! Every send publishes one [`PushEvent`] to the conversation's topic. A
//! WebSocket subscriber receives each event as a JSON text frame. Events are
//! fire-and-forget: nothing is replayed and delivery bookkeeping is untouched.

use axum::extract::ws::{Message, WebSocket};
use chrono::SecondsFormat;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::broker::Subscription;
use crate::storage::{MessageRecord, UserRecord};
use crate::time::from_millis;

/// Sender identity carried by push events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Events published to a conversation topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// A message was appended to the conversation.
    MessageSent {
        id: i64,
        conversation_id: i64,
        body: String,
        user: PushUser,
        created_at: String,
    },
}

impl PushEvent {
    pub fn message_sent(message: &MessageRecord, sender: &UserRecord) -> Self {
        PushEvent::MessageSent {
            id: message.id,
            conversation_id: message.conversation_id,
            body: message.body.clone(),
            user: PushUser {
                id: sender.id,
                first_name: sender.first_name.clone(),
                last_name: sender.last_name.clone(),
            },
            created_at: from_millis(message.created_at).to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Handle a single subscriber connection.
///
/// Runs until the client closes the socket or the topic goes away:
/// 1. Spawns a sender task forwarding topic events as text frames
/// 2. Drains inbound frames until the client closes
pub async fn handle_subscriber(
    socket: WebSocket,
    mut events: Subscription<PushEvent>,
    conversation_id: i64,
    user_id: i64,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    tracing::info!(
        conversation_id = conversation_id,
        user_id = user_id,
        "Conversation subscriber attached"
    );

    // ── Sender Task ───────────────────────────────────────────────────────

    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            break; // Connection closed
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize push event: {}", e);
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        conversation_id = conversation_id,
                        skipped = skipped,
                        "Subscriber lagged behind"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Receive Loop ──────────────────────────────────────────────────────

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                // Subscribers are read-only; anything else is ignored
                Ok(_) => continue,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(
        conversation_id = conversation_id,
        user_id = user_id,
        "Conversation subscriber detached"
    );
}
