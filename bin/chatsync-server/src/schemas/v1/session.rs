use chatsync_core::{
    ChatSession, IncomingMessage, MergeOutcome, Message, PromoteOutcome, SessionKind, SessionPatch,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::error::ServerError;

/// `?kind=` selector shared by every per-session route.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct KindQuery {
    /// `ephemeral` or `durable`; the server default applies when omitted.
    pub kind: Option<String>,
}

impl KindQuery {
    pub fn resolve(&self, default: SessionKind) -> Result<SessionKind, ServerError> {
        match self.kind.as_deref() {
            None | Some("") => Ok(default),
            Some(raw) => parse_kind(raw),
        }
    }

    /// Like [`KindQuery::resolve`], but `None` when no kind was named.
    pub fn filter(&self) -> Result<Option<SessionKind>, ServerError> {
        match self.kind.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => parse_kind(raw).map(Some),
        }
    }
}

pub fn parse_kind(raw: &str) -> Result<SessionKind, ServerError> {
    raw.parse()
        .map_err(|_| ServerError::BadRequest(format!("unknown session kind '{raw}'")))
}

pub fn parse_session_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw).map_err(|_| ServerError::BadRequest(format!("invalid session id '{raw}'")))
}

/// A message as sent by clients. `id` and `createdAt` are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<MessageInput> for IncomingMessage {
    fn from(m: MessageInput) -> Self {
        IncomingMessage {
            id: m.id,
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    #[validate(length(max = 200, message = "title too long"))]
    pub title: Option<String>,
    /// `ephemeral` or `durable`.
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: Option<String>,
    /// Merged into the stored list by id; never replaces it.
    #[serde(default)]
    pub messages: Option<Vec<MessageInput>>,
}

impl From<UpdateSessionRequest> for SessionPatch {
    fn from(r: UpdateSessionRequest) -> Self {
        SessionPatch {
            title: r.title,
            messages: r
                .messages
                .map(|ms| ms.into_iter().map(IncomingMessage::from).collect()),
        }
    }
}

/// Body of `POST /v1/sessions/{id}/messages`: exactly one of the two fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessagesRequest {
    #[serde(default)]
    pub message: Option<MessageInput>,
    #[serde(default)]
    pub messages: Option<Vec<MessageInput>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            role: m.role.into(),
            content: m.content,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: Uuid,
    /// `ephemeral` or `durable`.
    pub kind: String,
    pub owner_id: Uuid,
    pub title: String,
    /// Empty in list responses; see `messageCount`.
    pub messages: Vec<MessageResponse>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChatSession> for SessionResponse {
    fn from(s: ChatSession) -> Self {
        Self {
            id: s.id,
            kind: s.kind.to_string(),
            owner_id: s.owner_id,
            title: s.title,
            messages: s.messages.into_iter().map(MessageResponse::from).collect(),
            message_count: s.message_count,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchAppendResponse {
    pub success: bool,
    /// Messages actually added by this call.
    pub appended: usize,
    pub message_count: usize,
}

impl From<MergeOutcome> for BatchAppendResponse {
    fn from(o: MergeOutcome) -> Self {
        Self {
            success: true,
            appended: o.appended,
            message_count: o.message_count,
        }
    }
}

/// Single mode answers with the message, batch mode with counts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AppendMessagesResponse {
    Single(MessageResponse),
    Batch(BatchAppendResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromoteResponse {
    pub success: bool,
    /// `created` or `updated`.
    pub action: String,
    /// Id of the durable session.
    pub id: Uuid,
    pub message_count: usize,
}

impl From<PromoteOutcome> for PromoteResponse {
    fn from(o: PromoteOutcome) -> Self {
        Self {
            success: true,
            action: o.action.to_string(),
            id: o.id,
            message_count: o.message_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
