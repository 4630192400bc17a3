//! Session and user persistence.
//!
//! [`SessionStore`] is the strategy interface shared by the two session
//! backends: [`memory::MemoryStore`] (ephemeral, process lifetime) and
//! [`sqlite::SqliteStore`] (durable). [`crate::service::SessionService`]
//! picks one per call from the session's declared
//! [`crate::model::SessionKind`].
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` crate is required. Ownership checks are the service's job;
//! stores address sessions by id only.

pub mod memory;
pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::merge::{AppendOutcome, MergeOutcome};
use crate::model::{ChatSession, Message};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence contract for chat sessions and their append-only messages.
///
/// Methods addressing a single session return `Ok(None)` (or `Ok(false)`)
/// when the id is unknown.
pub trait SessionStore: Send + Sync + 'static {
    fn insert_session(
        &self,
        session: ChatSession,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Full session including messages in insertion order.
    fn get_session(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<ChatSession>, StoreError>> + Send;

    /// Owner of a session, without loading its messages.
    fn session_owner(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Uuid>, StoreError>> + Send;

    /// Sessions of `owner_id`, most recently updated first, messages omitted.
    fn list_sessions(
        &self,
        owner_id: Uuid,
    ) -> impl Future<Output = Result<Vec<ChatSession>, StoreError>> + Send;

    fn update_title(
        &self,
        id: Uuid,
        title: &str,
    ) -> impl Future<Output = Result<Option<ChatSession>, StoreError>> + Send;

    /// Delete a session and its messages. Returns `false` if it did not exist.
    fn delete_session(&self, id: Uuid) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Idempotent single append; see [`ChatSession::append_message`].
    fn append_message(
        &self,
        id: Uuid,
        message: Message,
    ) -> impl Future<Output = Result<Option<AppendOutcome>, StoreError>> + Send;

    /// Union-by-id batch merge; see [`ChatSession::merge_messages`].
    fn merge_messages(
        &self,
        id: Uuid,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<Option<MergeOutcome>, StoreError>> + Send;

    /// Overwrite the message list, returning the new count.
    fn replace_messages(
        &self,
        id: Uuid,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<Option<usize>, StoreError>> + Send;

    fn list_messages(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Vec<Message>>, StoreError>> + Send;

    /// Most recently updated session of `owner_id` carrying exactly `title`.
    fn find_by_title(
        &self,
        owner_id: Uuid,
        title: &str,
    ) -> impl Future<Output = Result<Option<Uuid>, StoreError>> + Send;
}

// ── Users ─────────────────────────────────────────────────────────────────────

/// A registered account. The password is kept only as an Argon2 hash in
/// PHC string form, which embeds its own salt and parameters.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence contract for accounts and bearer tokens.
pub trait UserStore: Send + Sync + 'static {
    /// Insert a user. Returns `false` when the email is already registered.
    fn insert_user(&self, user: UserRecord) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn find_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, StoreError>> + Send;

    fn get_user(&self, id: Uuid) -> impl Future<Output = Result<Option<UserRecord>, StoreError>> + Send;

    fn insert_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// User owning `token`, provided it has not expired at `now`.
    fn resolve_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Uuid>, StoreError>> + Send;

    fn delete_token(&self, token: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}
