use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chatsync_core::Identity;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::extract::ApiJson;
use crate::middleware::BearerToken;
use crate::schemas::v1::auth::{LoginRequest, LoginResponse, RegisterRequest, UserResponse};
use crate::schemas::v1::session::SuccessResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(register, login, logout, me),
    components(schemas(RegisterRequest, LoginRequest, LoginResponse, UserResponse, SuccessResponse))
)]
pub struct AuthApi;

pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn protected_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserResponse),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered"),
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ServerError> {
    req.validate()?;
    let user = state
        .auth
        .register(&req.email, &req.password, req.name.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 401, description = "Invalid email or password"),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let issued = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(issued.into()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Token revoked", body = SuccessResponse),
        (status = 401, description = "Unauthenticated"),
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<Json<SuccessResponse>, ServerError> {
    state.auth.logout(&token).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthenticated"),
    )
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state
        .auth
        .user(identity.user_id)
        .await?
        .ok_or_else(|| ServerError::Unauthenticated("account no longer exists".into()))?;
    Ok(Json(user.into()))
}
