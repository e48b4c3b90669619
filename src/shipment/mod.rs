//! Per-shipment discussion threads.
//!
//! Cursor-paginated history, watermark read tracking and a server-sent
//! event stream for live updates.

pub mod api;
pub mod stream;
pub mod thread;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub use thread::ShipmentThread;

/// Routes mounted under `/api/shipments`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:shipment_id/messages",
            get(api::list_messages).post(api::append_message),
        )
        .route("/:shipment_id/messages/read", post(api::mark_read))
        .route("/:shipment_id/messages/stream", get(api::stream_messages))
}
