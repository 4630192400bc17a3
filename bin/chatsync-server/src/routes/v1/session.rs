use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chatsync_core::{Identity, SessionKind, SessionRef};
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::extract::ApiJson;
use crate::schemas::v1::session::{
    CreateSessionRequest, KindQuery, MessageInput, MessageResponse, PromoteResponse,
    SessionResponse, SuccessResponse, UpdateSessionRequest, parse_kind, parse_session_id,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_sessions, create_session, get_session, update_session, delete_session, promote_session),
    components(schemas(
        CreateSessionRequest,
        UpdateSessionRequest,
        MessageInput,
        MessageResponse,
        SessionResponse,
        PromoteResponse,
        SuccessResponse
    ))
)]
pub struct SessionApi;

/// Register session routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route(
            "/sessions/{id}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/sessions/{id}/promote", post(promote_session))
}

/// Resolve the path id and `?kind=` into a [`SessionRef`].
pub(crate) fn session_ref(
    state: &AppState,
    id: &str,
    query: &KindQuery,
) -> Result<SessionRef, ServerError> {
    let kind = query.resolve(state.config.default_session_kind)?;
    Ok(SessionRef::new(parse_session_id(id)?, kind))
}

// ── Session handlers ──────────────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/v1/sessions",
    tag = "sessions",
    params(KindQuery),
    responses(
        (status = 200, description = "Sessions of the caller, newest first, without messages", body = Vec<SessionResponse>),
        (status = 400, description = "Unknown kind"),
        (status = 401, description = "Unauthenticated"),
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<KindQuery>,
) -> Result<Json<Vec<SessionResponse>>, ServerError> {
    let sessions = state.sessions.list(identity.user_id, query.filter()?).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionResponse::from(s.summary()))
            .collect(),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthenticated"),
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    req.validate()?;
    let kind = match req.kind.as_deref() {
        None | Some("") => state.config.default_session_kind,
        Some(raw) => parse_kind(raw)?,
    };
    let session = state.sessions.create(identity.user_id, kind, req.title).await?;
    Ok(Json(session.into()))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id (UUID)"), KindQuery),
    responses(
        (status = 200, description = "Session with messages", body = SessionResponse),
        (status = 400, description = "Malformed id or kind"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<SessionResponse>, ServerError> {
    let session = session_ref(&state, &id, &query)?;
    let session = state.sessions.get(identity.user_id, session).await?;
    Ok(Json(session.into()))
}

#[utoipa::path(
    put,
    path = "/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id (UUID)"), KindQuery),
    request_body = UpdateSessionRequest,
    responses(
        (status = 200, description = "Updated session", body = SessionResponse),
        (status = 400, description = "Bad request"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
    ApiJson(req): ApiJson<UpdateSessionRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    req.validate()?;
    let session = session_ref(&state, &id, &query)?;
    let session = state
        .sessions
        .update(identity.user_id, session, req.into())
        .await?;
    Ok(Json(session.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id (UUID)"), KindQuery),
    responses(
        (status = 200, description = "Session deleted", body = SuccessResponse),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let session = session_ref(&state, &id, &query)?;
    state.sessions.delete(identity.user_id, session).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/promote",
    tag = "sessions",
    params(("id" = String, Path, description = "Ephemeral session id (UUID)"), KindQuery),
    responses(
        (status = 200, description = "Copied into the durable store", body = PromoteResponse),
        (status = 400, description = "Source is not an ephemeral session"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn promote_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<PromoteResponse>, ServerError> {
    if query.filter()? == Some(SessionKind::Durable) {
        return Err(ServerError::BadRequest(
            "only ephemeral sessions can be promoted".into(),
        ));
    }
    let outcome = state
        .sessions
        .promote(identity.user_id, parse_session_id(&id)?)
        .await?;
    Ok(Json(outcome.into()))
}
