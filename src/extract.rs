//! Request extractors whose rejections render as [`Error`].
//!
//! axum's stock `Json`, `Query` and `Path` reject with plain-text bodies.
//! These wrappers route every rejection through the crate error so clients
//! always get `{ message, code, errors }`.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::Error;

/// JSON request body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct ApiJson<T>(pub T);

/// Query string.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct ApiQuery<T>(pub T);

/// Path parameters.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Error))]
pub struct ApiPath<T>(pub T);
