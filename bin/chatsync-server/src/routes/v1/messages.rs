//! The message sink: single and batch appends, merged by message id.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chatsync_core::{IncomingMessage, Identity};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::extract::ApiJson;
use crate::routes::v1::session::session_ref;
use crate::schemas::v1::session::{
    AppendMessagesRequest, AppendMessagesResponse, BatchAppendResponse, KindQuery, MessageResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_messages, append_messages),
    components(schemas(
        AppendMessagesRequest,
        AppendMessagesResponse,
        BatchAppendResponse,
        MessageResponse
    ))
)]
pub struct MessagesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/sessions/{id}/messages",
        get(list_messages).post(append_messages),
    )
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/messages",
    tag = "messages",
    params(("id" = String, Path, description = "Session id (UUID)"), KindQuery),
    responses(
        (status = 200, description = "Stored messages in order", body = Vec<MessageResponse>),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<Vec<MessageResponse>>, ServerError> {
    let session = session_ref(&state, &id, &query)?;
    let messages = state.sessions.messages(identity.user_id, session).await?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// `{message}` appends one message unless its id is already stored, in which
/// case the stored copy comes back unchanged. `{messages}` merges a batch.
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/messages",
    tag = "messages",
    params(("id" = String, Path, description = "Session id (UUID)"), KindQuery),
    request_body = AppendMessagesRequest,
    responses(
        (status = 200, description = "Stored message (single) or merge counts (batch)", body = AppendMessagesResponse),
        (status = 400, description = "Invalid payload or batch too large"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn append_messages(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
    ApiJson(req): ApiJson<AppendMessagesRequest>,
) -> Result<Json<AppendMessagesResponse>, ServerError> {
    let session = session_ref(&state, &id, &query)?;
    let response = match (req.message, req.messages) {
        (Some(message), None) => {
            let outcome = state
                .sessions
                .append_one(identity.user_id, session, message.into())
                .await?;
            AppendMessagesResponse::Single(outcome.into_message().into())
        }
        (None, Some(messages)) => {
            let messages = messages.into_iter().map(IncomingMessage::from).collect();
            let outcome = state
                .sessions
                .append_batch(identity.user_id, session, messages)
                .await?;
            AppendMessagesResponse::Batch(outcome.into())
        }
        _ => {
            return Err(ServerError::BadRequest(
                "provide exactly one of `message` or `messages`".into(),
            ));
        }
    };
    Ok(Json(response))
}
