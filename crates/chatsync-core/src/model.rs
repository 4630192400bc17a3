//! Chat session domain types shared by the stores, the HTTP layer and the
//! client-side synchronizer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Title given to sessions created without one.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum number of characters kept when deriving a title from a message.
const TITLE_MAX_CHARS: usize = 48;

// ── Role ──────────────────────────────────────────────────────────────────────

/// Author of a message. Unknown tags are preserved verbatim in [`Role::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Other(tag) => tag,
        }
    }
}

impl From<String> for Role {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "tool" => Role::Tool,
            _ => Role::Other(tag),
        }
    }
}

impl From<&str> for Role {
    fn from(tag: &str) -> Self {
        Role::from(tag.to_owned())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Session kind / reference ──────────────────────────────────────────────────

/// Which backend holds a session.
///
/// The kind is declared by the caller (request body on create, `?kind=` on
/// every other call) and is never inferred from the shape of the id.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionKind {
    /// Process-lifetime in-memory store.
    Ephemeral,
    /// SQLite-backed store.
    Durable,
}

/// Fully qualified pointer to a session: its id plus the backend that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: Uuid,
    pub kind: SessionKind,
}

impl SessionRef {
    pub fn new(id: Uuid, kind: SessionKind) -> Self {
        Self { id, kind }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A stored chat message. `id` is the only de-duplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message with a fresh id, stamped now.
    pub fn new(role: impl Into<Role>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: role.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(id: impl Into<String>, role: impl Into<Role>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(role, content)
        }
    }
}

/// A message as submitted by a client; every field is checked before it is
/// accepted by a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    /// Validate and complete the message: a missing or blank id is replaced
    /// with a fresh UUID and a missing timestamp with `now`.
    pub fn into_message(self, now: DateTime<Utc>) -> Result<Message, ServiceError> {
        let role = self
            .role
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| ServiceError::BadRequest("message requires role and content".into()))?;
        let content = self
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("message requires role and content".into()))?;
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Message {
            id,
            role: Role::from(role),
            content,
            created_at: self.created_at.unwrap_or(now),
        })
    }
}

impl From<Message> for IncomingMessage {
    fn from(m: Message) -> Self {
        Self {
            id: Some(m.id),
            role: Some(m.role.into()),
            content: Some(m.content),
            created_at: Some(m.created_at),
        }
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// One conversation thread owned by a user.
///
/// Listing operations return sessions with `messages` left empty; the
/// `message_count` field stays authoritative in that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: Uuid,
    pub kind: SessionKind,
    pub owner_id: Uuid,
    pub title: String,
    pub messages: Vec<Message>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// A new, empty session. Blank titles fall back to [`DEFAULT_TITLE`].
    pub fn new(owner_id: Uuid, kind: SessionKind, title: Option<String>, now: DateTime<Utc>) -> Self {
        let title = title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_owned());
        Self {
            id: Uuid::new_v4(),
            kind,
            owner_id,
            title,
            messages: Vec::new(),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn session_ref(&self) -> SessionRef {
        SessionRef::new(self.id, self.kind)
    }

    /// Drop the message bodies, keeping the cached count.
    pub fn summary(mut self) -> Self {
        self.messages = Vec::new();
        self
    }

    /// Replace the placeholder title with one derived from the first user
    /// message, if there is one.
    pub(crate) fn refresh_title(&mut self) {
        if self.title != DEFAULT_TITLE {
            return;
        }
        if let Some(title) = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| derive_title(&m.content))
        {
            self.title = title;
        }
    }
}

/// Short label for a session, built from a message body.
///
/// Whitespace runs are collapsed; long text is cut at a character boundary
/// and suffixed with `...`. Returns `None` for blank input.
pub fn derive_title(content: &str) -> Option<String> {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }
    let mut cut: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    Some(cut)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
