//! Conversation REST API handlers.
//!
//! Endpoints for listing and creating conversations, reading their history
//! and sending messages, plus the WebSocket push subscription.

use std::collections::HashMap;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::push::handle_subscriber;
use super::thread::{ConversationThread, HistorySelector};
use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::pagination::{PageMeta, PageRequest, SortOrder};
use crate::state::{AppState, ServerConfig};
use crate::storage::{MessageRecord, UserRecord};
use crate::thread::{Listed, Thread};
use crate::time::from_millis;
use crate::tracking::DeliveryStatus;

const DEFAULT_CONVERSATIONS_PER_PAGE: u32 = 15;
const DEFAULT_MESSAGES_PER_PAGE: u32 = 20;
const MAX_NAME_CHARS: usize = 100;

// ── Request / Response Types ─────────────────────────────────────────────────

/// GET /api/conversations
#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    pub all: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// GET /api/conversations/:id/messages
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub all: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub order: Option<String>,
}

/// POST /api/conversations
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub name: Option<String>,
    pub is_group: Option<bool>,
    #[serde(default)]
    pub participant_ids: Vec<i64>,
}

/// POST /api/conversations/:id/messages
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantItem {
    pub id: i64,
    pub name: String,
    pub profile_picture_url: Option<String>,
}

impl ParticipantItem {
    fn new(user: &UserRecord, config: &ServerConfig) -> Self {
        Self {
            id: user.id,
            name: user.full_name(),
            profile_picture_url: user
                .profile_picture
                .as_deref()
                .map(|path| config.storage_url_for(path)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LastMessageItem {
    pub id: i64,
    pub user_id: i64,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationItem {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_by: i64,
    pub participants_count: usize,
    pub participants: Vec<ParticipantItem>,
    pub last_message: Option<LastMessageItem>,
}

#[derive(Debug, Serialize)]
pub struct MessageItem {
    pub id: i64,
    pub conversation_id: i64,
    pub user: ParticipantItem,
    pub body: String,
    pub status: DeliveryStatus,
    pub created_at: String,
    pub read_at: Option<String>,
}

/// Listing envelope; `meta` is omitted for `all=true`.
#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub message: &'static str,
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub message: &'static str,
    pub id: i64,
}

/// `true`, `1`, `yes` and `on` (any case) read as set.
pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

pub(crate) fn rfc3339(ms: i64) -> String {
    from_millis(ms).to_rfc3339()
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/conversations: Conversations of the caller, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<ConversationsQuery>,
) -> Result<impl IntoResponse> {
    let page = (!parse_flag(query.all.as_deref()))
        .then(|| PageRequest::new(query.page, query.per_page, DEFAULT_CONVERSATIONS_PER_PAGE));

    let (conversations, total) = state.db.conversations_for_user(principal.id(), page.as_ref())?;

    let mut data = Vec::with_capacity(conversations.len());
    for conv in conversations {
        let participants: Vec<ParticipantItem> = state
            .db
            .participants(conv.id)?
            .iter()
            .map(|u| ParticipantItem::new(u, &state.config))
            .collect();
        let last_message = state.db.last_message(conv.id)?.map(|m| LastMessageItem {
            id: m.id,
            user_id: m.user_id,
            body: m.body,
            created_at: rfc3339(m.created_at),
        });

        data.push(ConversationItem {
            id: conv.id,
            name: conv.name,
            is_group: conv.is_group,
            created_by: conv.created_by,
            participants_count: participants.len(),
            participants,
            last_message,
        });
    }

    Ok(Json(ListResponse {
        message: "Conversations fetched successfully",
        data,
        meta: page.map(|p| PageMeta::new(&p, total)),
    }))
}

/// POST /api/conversations: Create a conversation.
///
/// The creator is always a participant. A two-person, non-group
/// conversation that already exists is returned instead of duplicated.
pub async fn create_conversation(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    if req.participant_ids.is_empty() {
        return Err(Error::validation(
            "participant_ids",
            "The participant ids field is required.",
        ));
    }
    if let Some(name) = &req.name {
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(Error::validation(
                "name",
                format!("The name field must not be greater than {MAX_NAME_CHARS} characters."),
            ));
        }
    }

    let missing = state.db.missing_user_ids(&req.participant_ids)?;
    if !missing.is_empty() {
        return Err(Error::validation(
            "participant_ids",
            format!("The selected participant ids are invalid: {:?}", missing),
        ));
    }

    let mut participant_ids: Vec<i64> = Vec::with_capacity(req.participant_ids.len() + 1);
    for id in req.participant_ids.iter().copied().chain(std::iter::once(principal.id())) {
        if !participant_ids.contains(&id) {
            participant_ids.push(id);
        }
    }

    let is_group = req.is_group.unwrap_or(participant_ids.len() > 2);
    if !is_group && participant_ids.len() != 2 {
        return Err(Error::validation(
            "participant_ids",
            "A direct conversation needs exactly one other participant.",
        ));
    }

    let id = state.db.create_conversation(
        req.name.as_deref(),
        is_group,
        principal.id(),
        &participant_ids,
    )?;
    tracing::info!(
        conversation_id = id,
        user_id = principal.id(),
        is_group = is_group,
        participants = participant_ids.len(),
        "Conversation created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: "Conversation created",
            id,
        }),
    ))
}

/// GET /api/conversations/:id/messages: History of one conversation.
pub async fn list_messages(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<MessagesQuery>,
) -> Result<impl IntoResponse> {
    let thread = ConversationThread::open(&state, conversation_id)?;

    let page = (!parse_flag(query.all.as_deref()))
        .then(|| PageRequest::new(query.page, query.per_page, DEFAULT_MESSAGES_PER_PAGE));
    let selector = HistorySelector {
        order: SortOrder::parse(query.order.as_deref()),
        page,
    };

    let history = thread.list(&principal, selector)?;
    let mut senders = thread.participants_by_id()?;

    let mut data = Vec::with_capacity(history.items.len());
    for listed in history.items {
        let user = sender_item(&state, &mut senders, listed.message.user_id)?;
        data.push(message_item(listed, user));
    }

    Ok(Json(ListResponse {
        message: "Messages fetched successfully",
        data,
        meta: page.map(|p| PageMeta::new(&p, history.total)),
    }))
}

/// POST /api/conversations/:id/messages: Send and publish to subscribers.
pub async fn send_message(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiJson(req): ApiJson<SendRequest>,
) -> Result<impl IntoResponse> {
    let thread = ConversationThread::open(&state, conversation_id)?;
    let body = req.body.unwrap_or_default();
    let listed = thread.append(&principal, &body)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: "Message sent",
            id: listed.message.id,
        }),
    ))
}

/// GET /api/conversations/:id/ws: Push subscription, members only.
pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(conversation_id): ApiPath<i64>,
) -> Result<impl IntoResponse> {
    let thread = ConversationThread::open(&state, conversation_id)?;
    let events = thread.subscribe(&principal)?;
    let user_id = principal.id();

    Ok(ws.on_upgrade(move |socket| handle_subscriber(socket, events, conversation_id, user_id)))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn sender_item(
    state: &AppState,
    known: &mut HashMap<i64, UserRecord>,
    user_id: i64,
) -> Result<ParticipantItem> {
    if !known.contains_key(&user_id) {
        let user = state.db.get_user(user_id)?.ok_or(Error::UserNotFound)?;
        known.insert(user_id, user);
    }
    known
        .get(&user_id)
        .map(|u| ParticipantItem::new(u, &state.config))
        .ok_or(Error::UserNotFound)
}

fn message_item(listed: Listed<MessageRecord>, user: ParticipantItem) -> MessageItem {
    let m = listed.message;
    MessageItem {
        id: m.id,
        conversation_id: m.conversation_id,
        user,
        body: m.body,
        status: listed.status,
        created_at: rfc3339(m.created_at),
        read_at: m.read_at.map(rfc3339),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("TRUE")));
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("on")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn test_participant_item_resolves_picture_url() {
        let user = UserRecord {
            id: 3,
            name: "Citra Dewi".into(),
            first_name: Some("Citra".into()),
            last_name: None,
            profile_picture: Some("avatars/citra.png".into()),
            role_id: 2,
        };
        let item = ParticipantItem::new(&user, &ServerConfig::default());
        assert_eq!(item.name, "Citra");
        assert_eq!(item.profile_picture_url.as_deref(), Some("/storage/avatars/citra.png"));
    }

    #[test]
    fn test_list_response_omits_meta_when_unpaged() {
        let body: ListResponse<MessageItem> = ListResponse {
            message: "Messages fetched successfully",
            data: Vec::new(),
            meta: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("meta").is_none());
    }
}
