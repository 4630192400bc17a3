//! Bearer-token authentication for the session and account routes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ServerError;
use crate::state::AppState;

/// The raw token of an authenticated request, kept for logout.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Resolve `Authorization: Bearer <token>` to an
/// [`Identity`](chatsync_core::Identity) and attach it, together with the
/// token, as request extensions. Missing, unknown or expired tokens are
/// rejected with 401.
pub async fn require_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| ServerError::Unauthenticated("missing bearer token".into()))?
        .to_owned();
    let identity = state
        .auth
        .resolve(&token)
        .await?
        .ok_or_else(|| ServerError::Unauthenticated("invalid or expired token".into()))?;

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(BearerToken(token));
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
