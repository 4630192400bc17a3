pub mod auth;
pub mod messages;
pub mod session;

use std::sync::Arc;

use axum::{Router, middleware};
use utoipa::OpenApi;

use crate::middleware::require_identity;
use crate::state::AppState;

/// Routes nested under `/v1`. Everything except register and login requires
/// a bearer token.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .merge(auth::protected_router())
        .merge(session::router())
        .merge(messages::router())
        .route_layer(middleware::from_fn_with_state(state, require_identity));

    Router::new().merge(auth::public_router()).merge(protected)
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(auth::AuthApi::openapi());
    spec.merge(session::SessionApi::openapi());
    spec.merge(messages::MessagesApi::openapi());
    spec
}
