//! # Shipdesk
//!
//! Messaging and read-tracking core of the shipment back office.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP (axum)                             │
//! │  /api/shipments/:id/messages[/read|/stream]                     │
//! │  /api/conversations[/:id/messages|/:id/ws]                      │
//! │  /api/messages[/conversations|/unread-count|/updates|/:id/read] │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Thread capability            │  Read tracking                  │
//! │  ├── ShipmentThread           │  ├── WatermarkTracker           │
//! │  └── ConversationThread       │  └── FlagTracker                │
//! ├───────────────────────────────┴─────────────────────────────────┤
//! │  Pagination (offset pages, backward id cursors)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Broker (shipment wake-ups, conversation push)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Storage (SQLite)                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod broker;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod pagination;
pub mod shipment;
pub mod state;
pub mod storage;
pub mod thread;
pub mod time;
pub mod tracking;

use axum::{http::Method, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{Error, Result};
pub use state::{AppState, ServerConfig};

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/shipments", shipment::routes())
        .nest("/api/conversations", conversation::routes())
        .nest("/api/messages", conversation::direct_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "shipdesk",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::storage::{Database, NewUser};

    fn app() -> (Router, AppState) {
        let state = AppState::new(Database::open(None).unwrap(), ServerConfig::default());
        (router(state.clone()), state)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_api_requires_principal() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_shipment_is_not_found() {
        let (app, state) = app();
        let user = state.db.create_user(&NewUser::named("Pia")).unwrap();
        let response = app
            .oneshot(
                Request::get("/api/shipments/77/messages")
                    .header(auth::USER_HEADER, user.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["code"].is_number());
    }
}
