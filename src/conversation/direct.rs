//! Direct-message REST API handlers.
//!
//! The inbox/sent/history folders, partner threads, read receipts and the
//! incremental sync feed. These views run over the same conversations and
//! messages as the general chat; a direct conversation is simply the
//! non-group conversation of a user pair.
//!
//! Every listing that returns messages addressed to the caller stamps them
//! delivered before statuses are computed.

use std::collections::HashMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::api::rfc3339;
use super::thread::ConversationThread;
use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::pagination::{clamp_limit, PageMeta, PageRequest};
use crate::state::AppState;
use crate::storage::{Folder, MessageRecord, UserRecord};
use crate::thread::{validate_body, with_statuses, Listed, Thread};
use crate::time::parse_watermark;
use crate::tracking::{DeliveryStatus, FlagTracker, ReadTracker};

const DEFAULT_FOLDER_PER_PAGE: u32 = 10;
const DEFAULT_THREADS_PER_PAGE: u32 = 10;
const DEFAULT_THREAD_MESSAGES_PER_PAGE: u32 = 50;
const DEFAULT_UPDATES_LIMIT: u32 = 50;

// ── Request / Response Types ─────────────────────────────────────────────────

/// GET /api/messages
#[derive(Debug, Deserialize)]
pub struct FolderQuery {
    pub folder: Option<String>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// GET /api/messages/conversations
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// GET /api/messages/conversations/:partner_id
#[derive(Debug, Deserialize)]
pub struct PartnerQuery {
    pub since: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// GET /api/messages/updates
#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    pub updated_after: Option<String>,
    pub limit: Option<i64>,
}

/// POST /api/messages
#[derive(Debug, Deserialize)]
pub struct SendDirectRequest {
    pub to_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
}

/// A message in a folder listing, with the partner resolved.
#[derive(Debug, Serialize)]
pub struct FolderItem {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub text: String,
    pub status: DeliveryStatus,
    pub created_at: String,
    pub updated_at: String,
    pub read_at: Option<String>,
    #[serde(rename = "toId")]
    pub to_id: Option<i64>,
    #[serde(rename = "toName")]
    pub to_name: Option<String>,
}

/// A message of a partner thread or the sync feed.
#[derive(Debug, Serialize)]
pub struct DirectItem {
    pub id: i64,
    pub sender_id: i64,
    pub text: String,
    pub status: DeliveryStatus,
    pub created_at: String,
    pub updated_at: String,
    pub read_at: Option<String>,
}

impl From<Listed<MessageRecord>> for DirectItem {
    fn from(listed: Listed<MessageRecord>) -> Self {
        let m = listed.message;
        Self {
            id: m.id,
            sender_id: m.user_id,
            text: m.body,
            status: listed.status,
            created_at: rfc3339(m.created_at),
            updated_at: rfc3339(m.updated_at),
            read_at: m.read_at.map(rfc3339),
        }
    }
}

/// POST /api/messages response.
#[derive(Debug, Serialize)]
pub struct SentItem {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub text: String,
    pub status: DeliveryStatus,
    pub created_at: String,
    pub updated_at: String,
    pub read_at: Option<String>,
}

/// One row of the direct-conversation list.
#[derive(Debug, Serialize)]
pub struct ThreadItem {
    pub id: i64,
    pub partner_id: Option<i64>,
    pub partner_name: Option<String>,
    pub last_message_preview: String,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ReadReceipt {
    pub id: i64,
    pub status: DeliveryStatus,
    pub read_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub inbox_unread: i64,
    pub total_unread: i64,
}

#[derive(Debug, Serialize)]
pub struct PagedResponse<T: Serialize> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct SyncCursor {
    pub updated_after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdatesResponse {
    pub data: Vec<DirectItem>,
    pub cursor: SyncCursor,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/messages: Inbox, sent or full history, newest first.
pub async fn list_folder(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<FolderQuery>,
) -> Result<impl IntoResponse> {
    let viewer = principal.id();
    let folder = Folder::parse(query.folder.as_deref());
    let page = PageRequest::new(query.page, query.per_page, DEFAULT_FOLDER_PER_PAGE);
    let search = query.q.as_deref().map(str::trim);

    let (messages, total) = state.db.folder_messages(viewer, folder, search, &page)?;
    let listed = delivered_view(&state, viewer, messages)?;

    let mut partners: HashMap<i64, Option<UserRecord>> = HashMap::new();
    let mut data = Vec::with_capacity(listed.len());
    for Listed { message: m, status } in listed {
        if !partners.contains_key(&m.conversation_id) {
            let partner = state.db.conversation_partner(m.conversation_id, viewer)?;
            partners.insert(m.conversation_id, partner);
        }
        let partner = partners.get(&m.conversation_id).and_then(|p| p.as_ref());

        data.push(FolderItem {
            id: m.id,
            sender_id: m.user_id,
            receiver_id: partner.map(|p| p.id),
            text: m.body,
            status,
            created_at: rfc3339(m.created_at),
            updated_at: rfc3339(m.updated_at),
            read_at: m.read_at.map(rfc3339),
            to_id: partner.map(|p| p.id),
            to_name: partner.map(|p| p.name.clone()),
        });
    }

    Ok(Json(PagedResponse {
        data,
        meta: PageMeta::new(&page, total),
    }))
}

/// POST /api/messages: Send to a user, creating the direct conversation on
/// first contact.
pub async fn send_direct(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<SendDirectRequest>,
) -> Result<impl IntoResponse> {
    let to_id = req
        .to_id
        .ok_or_else(|| Error::validation("to_id", "The to id field is required."))?;
    let text = req.text.unwrap_or_default();
    validate_body("text", &text)?;

    if to_id == principal.id() {
        return Err(Error::validation("to_id", "Cannot send to self"));
    }
    if state.db.get_user(to_id)?.is_none() {
        return Err(Error::validation("to_id", "The selected to id is invalid."));
    }

    let (conversation_id, created) = state
        .db
        .find_or_create_direct_conversation(principal.id(), to_id)?;
    if created {
        tracing::info!(
            conversation_id = conversation_id,
            user_id = principal.id(),
            partner_id = to_id,
            "Direct conversation created"
        );
    }

    let thread = ConversationThread::open(&state, conversation_id)?;
    let Listed { message: m, status } = thread.append(&principal, &text)?;

    Ok((
        StatusCode::CREATED,
        Json(SentItem {
            id: m.id,
            sender_id: m.user_id,
            receiver_id: to_id,
            text: m.body,
            status,
            created_at: rfc3339(m.created_at),
            updated_at: rfc3339(m.updated_at),
            read_at: None,
        }),
    ))
}

/// GET /api/messages/conversations: Direct conversations, most recent first.
pub async fn list_threads(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse> {
    let viewer = principal.id();
    let page = PageRequest::new(query.page, query.per_page, DEFAULT_THREADS_PER_PAGE);
    let (conversations, total) = state.db.direct_conversations_for_user(viewer, &page)?;

    let mut data = Vec::with_capacity(conversations.len());
    for conv in conversations {
        let partner = state.db.conversation_partner(conv.id, viewer)?;
        let last = state.db.last_message(conv.id)?;
        data.push(ThreadItem {
            id: conv.id,
            partner_id: partner.as_ref().map(|p| p.id),
            partner_name: partner.map(|p| p.name),
            last_message_preview: last.as_ref().map(|m| m.body.clone()).unwrap_or_default(),
            last_message_at: last.map(|m| rfc3339(m.created_at)),
            unread_count: state.db.unread_count(viewer, Some(conv.id))?,
        });
    }

    Ok(Json(PagedResponse {
        data,
        meta: PageMeta::new(&page, total),
    }))
}

/// GET /api/messages/conversations/:partner_id: Messages exchanged with one
/// partner, oldest first.
pub async fn list_partner_messages(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(partner_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PartnerQuery>,
) -> Result<impl IntoResponse> {
    let viewer = principal.id();
    let since = query
        .since
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_watermark("since", s))
        .transpose()?;
    let page = PageRequest::new(query.page, query.per_page, DEFAULT_THREAD_MESSAGES_PER_PAGE);

    let conversation_id = state
        .db
        .find_direct_conversation(viewer, partner_id)?
        .ok_or(Error::ConversationNotFound)?;

    let (messages, total) = state.db.direct_messages(conversation_id, since, &page)?;
    let listed = delivered_view(&state, viewer, messages)?;

    Ok(Json(PagedResponse {
        data: listed.into_iter().map(DirectItem::from).collect(),
        meta: PageMeta::new(&page, total),
    }))
}

/// POST /api/messages/:id/read: Read receipt from the recipient.
pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<impl IntoResponse> {
    let message = state
        .db
        .get_message(message_id)?
        .ok_or(Error::MessageNotFound)?;

    let tracker = FlagTracker::new(state.db.clone());
    let read_at = tracker.mark_read(message.conversation_id, principal.id(), message_id)?;
    let stored = state
        .db
        .get_message(message_id)?
        .ok_or(Error::MessageNotFound)?;

    Ok(Json(ReadReceipt {
        id: message_id,
        status: DeliveryStatus::Read,
        read_at: Some(rfc3339(read_at)),
        updated_at: rfc3339(stored.updated_at),
    }))
}

/// GET /api/messages/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse> {
    let count = state.db.unread_count(principal.id(), None)?;
    Ok(Json(UnreadCount {
        inbox_unread: count,
        total_unread: count,
    }))
}

/// GET /api/messages/updates: Rows changed after the watermark.
///
/// The returned cursor is the highest `updated_at` of the batch as read,
/// before the delivered stamp; feeding it back resumes the sync.
pub async fn list_updates(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<UpdatesQuery>,
) -> Result<impl IntoResponse> {
    let viewer = principal.id();
    let updated_after = query
        .updated_after
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_watermark("updated_after", s))
        .transpose()?;
    let limit = clamp_limit(query.limit, DEFAULT_UPDATES_LIMIT);

    let messages = state.db.message_updates(viewer, updated_after, limit)?;
    // Taken before stamping: stamped rows move past it and come back once as
    // delivered, while rows beyond the limit stay ahead of it.
    let cursor = SyncCursor {
        updated_after: sync_cursor(&messages).map(rfc3339),
    };
    let listed = delivered_view(&state, viewer, messages)?;

    Ok(Json(UpdatesResponse {
        data: listed.into_iter().map(DirectItem::from).collect(),
        cursor,
    }))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Resume watermark of an updates batch.
fn sync_cursor(batch: &[MessageRecord]) -> Option<i64> {
    batch.iter().map(|m| m.updated_at).max()
}

/// Mark-delivered-on-view, then resolve statuses for the viewer.
fn delivered_view(
    state: &AppState,
    viewer_id: i64,
    mut messages: Vec<MessageRecord>,
) -> Result<Vec<Listed<MessageRecord>>> {
    let tracker = FlagTracker::new(state.db.clone());
    tracker.mark_delivered_on_view(viewer_id, &mut messages)?;
    // Flag statuses depend only on the rows themselves.
    let statuses = tracker.resolve(0, viewer_id, &messages)?;
    Ok(with_statuses(messages, statuses))
}
