//! # Error Handling
//!
//! Error types shared by the storage layer, the thread services and the
//! HTTP surface.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Lookup Errors (404)                                               │
//! │  │   ├── ShipmentNotFound      - Shipment id does not resolve          │
//! │  │   ├── ConversationNotFound  - Conversation id does not resolve      │
//! │  │   ├── MessageNotFound       - Message id does not resolve           │
//! │  │   └── UserNotFound          - User id does not resolve              │
//! │  │                                                                      │
//! │  ├── Access Errors                                                     │
//! │  │   ├── Unauthorized (401)    - No authenticated principal            │
//! │  │   └── Forbidden (403)       - Principal may not touch the thread    │
//! │  │                                                                      │
//! │  ├── Input Errors                                                      │
//! │  │   ├── Validation (422)      - Malformed request field               │
//! │  │   └── InvalidReference (400)- Id that exists but not in this thread │
//! │  │                                                                      │
//! │  └── Internal Errors (500)                                             │
//! │      ├── DatabaseError         - Store failure, propagated untouched   │
//! │      ├── SerializationError    - JSON encoding failure                 │
//! │      └── Internal              - Should not happen                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these are retried by the core. Authorization and validation run
//! before any mutation, so an error never leaves a partial write behind.

use axum::extract::path::ErrorKind as PathErrorKind;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for shipdesk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shipdesk
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lookup Errors (100-199)
    // ========================================================================

    /// Shipment does not exist
    #[error("Shipment not found.")]
    ShipmentNotFound,

    /// Conversation does not exist
    #[error("Conversation not found.")]
    ConversationNotFound,

    /// Message does not exist
    #[error("Message not found.")]
    MessageNotFound,

    /// User does not exist
    #[error("User not found.")]
    UserNotFound,

    // ========================================================================
    // Access Errors (200-299)
    // ========================================================================

    /// No authenticated principal on the request
    #[error("Unauthenticated.")]
    Unauthorized,

    /// Principal is not allowed to access the thread
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ========================================================================
    // Input Errors (300-399)
    // ========================================================================

    /// A request field failed validation
    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    /// A referenced id is well-formed but does not belong to the thread
    #[error("Invalid reference: {field}: {message}")]
    InvalidReference { field: String, message: String },

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Get the numeric error code
    ///
    /// - 100-199: Lookup
    /// - 200-299: Access
    /// - 300-399: Input
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::ShipmentNotFound => 100,
            Error::ConversationNotFound => 101,
            Error::MessageNotFound => 102,
            Error::UserNotFound => 103,

            Error::Unauthorized => 200,
            Error::Forbidden(_) => 201,

            Error::Validation { .. } => 300,
            Error::InvalidReference { .. } => 301,

            Error::DatabaseError(_) => 900,
            Error::SerializationError(_) => 901,
            Error::Internal(_) => 902,
        }
    }

    /// HTTP status the error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::ShipmentNotFound
            | Error::ConversationNotFound
            | Error::MessageNotFound
            | Error::UserNotFound => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidReference { .. } => StatusCode::BAD_REQUEST,
            Error::DatabaseError(_) | Error::SerializationError(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ── Extractor Rejections ─────────────────────────────────────────────────────

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) => {
                let detail = strip_preamble(&text);
                match detail.split_once(": ") {
                    Some((path, rest)) if is_field_path(path) => Error::validation(path, rest),
                    _ => Error::validation("body", detail),
                }
            }
            _ => Error::validation("body", strip_preamble(&text)),
        }
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        // serde_urlencoded does not report which parameter failed
        Error::validation("query", strip_preamble(&rejection.body_text()))
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        match &rejection {
            PathRejection::FailedToDeserializePathParams(e) => match e.kind() {
                PathErrorKind::ParseErrorAtKey { key, .. } => {
                    Error::validation(key, format!("The {key} must be an integer."))
                }
                _ => Error::validation("path", e.body_text()),
            },
            _ => Error::Internal(rejection.body_text()),
        }
    }
}

/// Drop axum's "Failed to deserialize ...: " lead-in.
fn strip_preamble(text: &str) -> &str {
    text.split_once(": ").map_or(text, |(_, rest)| rest)
}

/// `last_read_id`, `participant_ids[2]`, `user.id`; not free text.
fn is_field_path(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

// ============================================================================
// HTTP REPRESENTATION
// ============================================================================

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = match &self {
            Error::Validation { field, message } | Error::InvalidReference { field, message } => {
                let mut errors = serde_json::Map::new();
                errors.insert(field.clone(), json!([message]));
                json!({
                    "message": "Validation failed",
                    "code": self.code(),
                    "errors": errors,
                })
            }
            // Store details stay in the log.
            Error::DatabaseError(_) | Error::SerializationError(_) | Error::Internal(_) => json!({
                "message": "Internal server error",
                "code": self.code(),
            }),
            _ => json!({
                "message": self.to_string(),
                "code": self.code(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// TESTS
// ============================================================================
