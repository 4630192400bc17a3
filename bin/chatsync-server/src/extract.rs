//! Request extractors whose rejections use the server's error body.

use axum::extract::FromRequest;

use crate::error::ServerError;

/// `axum::Json` with a 400 `{"error": ...}` rejection instead of axum's
/// plain-text 415/422 responses.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ServerError))]
pub struct ApiJson<T>(pub T);
