//! General chat: group and direct conversations.
//!
//! Conversation messages carry per-message delivery flags and fan out to
//! WebSocket subscribers on every send.

pub mod api;
pub mod direct;
pub mod push;
pub mod thread;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub use push::PushEvent;
pub use thread::ConversationThread;

/// Routes mounted under `/api/conversations`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api::list_conversations).post(api::create_conversation))
        .route(
            "/:conversation_id/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/:conversation_id/ws", get(api::subscribe))
}

/// Routes mounted under `/api/messages`.
pub fn direct_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(direct::list_folder).post(direct::send_direct))
        .route("/conversations", get(direct::list_threads))
        .route("/conversations/:partner_id", get(direct::list_partner_messages))
        .route("/unread-count", get(direct::unread_count))
        .route("/updates", get(direct::list_updates))
        .route("/:message_id/read", post(direct::mark_read))
}
