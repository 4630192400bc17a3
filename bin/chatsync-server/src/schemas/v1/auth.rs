use chatsync_core::{IssuedToken, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Request body for `POST /v1/auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 254, message = "email must be 3-254 characters"))]
    pub email: String,
    #[validate(length(max = 256, message = "password too long"))]
    pub password: String,
    /// Display name; defaults to the local part of the email.
    #[serde(default)]
    #[validate(length(max = 100, message = "name too long"))]
    pub name: Option<String>,
}

/// Request body for `POST /v1/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Send as `Authorization: Bearer <token>`.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            created_at: u.created_at,
        }
    }
}

impl From<IssuedToken> for LoginResponse {
    fn from(t: IssuedToken) -> Self {
        Self {
            token: t.token,
            expires_at: t.expires_at,
            user: t.user.into(),
        }
    }
}
