//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Internal errors (Database, Internal) are logged with full detail but only
//! a generic message is returned to the caller so that SQL or other
//! implementation details never leak to clients.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatsync_core::{AuthError, ServiceError, StoreError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the chatsync-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No bearer token, or one that is unknown or expired.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The resource exists but belongs to someone else.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request conflicts with existing state (e.g. a taken email).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Propagated from the session or user store.
    #[error("database error: {0}")]
    Database(#[from] StoreError),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServerError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),

            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<ServiceError> for ServerError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(m) => ServerError::NotFound(m),
            ServiceError::Forbidden(m) => ServerError::Forbidden(m),
            ServiceError::BadRequest(m) => ServerError::BadRequest(m),
            ServiceError::Store(e) => ServerError::Database(e),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidInput(m) => ServerError::BadRequest(m),
            AuthError::EmailTaken => ServerError::Conflict(e.to_string()),
            AuthError::InvalidCredentials => ServerError::Unauthenticated(e.to_string()),
            AuthError::Hashing(m) => ServerError::Internal(m),
            AuthError::Store(e) => ServerError::Database(e),
        }
    }
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(e: validator::ValidationErrors) -> Self {
        let message = e
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |err| match &err.message {
                    Some(m) => format!("{field}: {m}"),
                    None => format!("{field}: invalid value"),
                })
            })
            .collect::<Vec<_>>()
            .join("; ");
        ServerError::BadRequest(message)
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
