//! Shipment thread REST API handlers.
//!
//! All routes resolve the shipment first (404), then the caller's access
//! (403), then validate the request body.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{sse::Sse, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};

use super::stream::{message_stream, resume_point, StreamTiming};
use super::thread::ShipmentThread;
use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::pagination::{CursorMeta, CursorRequest};
use crate::state::AppState;
use crate::storage::ShipmentMessageRecord;
use crate::thread::{Listed, Thread};
use crate::time::from_millis;
use crate::tracking::DeliveryStatus;

/// Default history batch size.
const DEFAULT_LIMIT: u32 = 20;

// ── Request / Response Types ─────────────────────────────────────────────────

/// GET /api/shipments/:id/messages
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub cursor: Option<i64>,
}

/// POST /api/shipments/:id/messages
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    #[serde(default)]
    pub text: Option<String>,
}

/// POST /api/shipments/:id/messages/read
#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    #[serde(default)]
    pub last_read_id: Option<i64>,
}

/// GET /api/shipments/:id/messages/stream
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub since_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderRef {
    pub id: i64,
    pub name: Option<String>,
}

/// One message as rendered to clients, in listings, appends and stream events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentMessageItem {
    pub id: i64,
    pub shipment_id: i64,
    pub sender: SenderRef,
    pub text: String,
    pub status: DeliveryStatus,
    pub created_at: String,
}

impl From<Listed<ShipmentMessageRecord>> for ShipmentMessageItem {
    fn from(listed: Listed<ShipmentMessageRecord>) -> Self {
        let m = listed.message;
        Self {
            id: m.id,
            shipment_id: m.shipment_id,
            sender: SenderRef {
                id: m.sender_id,
                name: m.sender_name,
            },
            text: m.text,
            status: listed.status,
            created_at: from_millis(m.created_at).to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub data: Vec<ShipmentMessageItem>,
    pub meta: CursorMeta,
}

#[derive(Serialize)]
pub struct ReadPosition {
    pub shipment_id: i64,
    pub last_read_id: i64,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/shipments/:id/messages: Backward-paginated history, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(shipment_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse> {
    let thread = ShipmentThread::open(&state, shipment_id)?;
    thread.authorize(&principal)?;

    let request = CursorRequest::new(query.cursor, query.limit, DEFAULT_LIMIT)?;
    let page = thread.list(&principal, request)?;
    let meta = request.meta(&page);

    Ok(Json(ListResponse {
        data: page.items.into_iter().map(ShipmentMessageItem::from).collect(),
        meta,
    }))
}

/// POST /api/shipments/:id/messages: Append to the thread.
pub async fn append_message(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(shipment_id): ApiPath<i64>,
    ApiJson(req): ApiJson<AppendRequest>,
) -> Result<impl IntoResponse> {
    let thread = ShipmentThread::open(&state, shipment_id)?;
    let text = req.text.unwrap_or_default();
    let listed = thread.append(&principal, &text)?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: ShipmentMessageItem::from(listed),
        }),
    ))
}

/// POST /api/shipments/:id/messages/read: Advance the caller's read position.
///
/// The response carries the stored mark, which stays put when the
/// proposed id is older than what was already read.
pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(shipment_id): ApiPath<i64>,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> Result<impl IntoResponse> {
    let thread = ShipmentThread::open(&state, shipment_id)?;
    thread.authorize(&principal)?;

    let proposed = req
        .last_read_id
        .ok_or_else(|| Error::validation("last_read_id", "The last_read_id field is required."))?;
    let stored = thread.mark_read(&principal, proposed)?;

    Ok(Json(DataResponse {
        data: ReadPosition {
            shipment_id,
            last_read_id: stored,
        },
    }))
}

/// GET /api/shipments/:id/messages/stream: Server-sent events of new messages.
pub async fn stream_messages(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(shipment_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<StreamQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let thread = ShipmentThread::open(&state, shipment_id)?;
    let wake = thread.subscribe(&principal)?;

    let last_event_id = headers.get("last-event-id").and_then(|v| v.to_str().ok());
    let since_id = resume_point(query.since_id, last_event_id);

    let stream = message_stream(
        thread,
        principal.id(),
        since_id,
        Some(wake),
        StreamTiming::from(&state.config),
    );

    Ok((
        [(axum::http::header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream),
    ))
}
