//! Session routing, ownership checks and the message sink entry points.
//!
//! [`SessionService`] owns one store per [`SessionKind`] and forwards every
//! call to the backend named by the caller. Before touching a session it
//! resolves the owner: unknown ids are [`ServiceError::NotFound`], sessions of
//! another user are [`ServiceError::Forbidden`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::merge::{AppendOutcome, MergeOutcome};
use crate::model::{ChatSession, IncomingMessage, Message, SessionKind, SessionRef};
use crate::store::{MemoryStore, SessionStore, SqliteStore};

/// Upper bound on messages accepted in one batch append.
pub const MAX_BATCH_MESSAGES: usize = 1000;

/// Run `$body` against the store that backs `$kind`, bound as `$store`.
macro_rules! with_store {
    ($svc:expr, $kind:expr, |$store:ident| $body:expr) => {
        match $kind {
            SessionKind::Ephemeral => {
                let $store = &*$svc.ephemeral;
                $body
            }
            SessionKind::Durable => {
                let $store = &*$svc.durable;
                $body
            }
        }
    };
}

/// Partial update accepted by `PUT /sessions/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default)]
    pub title: Option<String>,
    /// Merged by id, never replacing stored messages.
    #[serde(default)]
    pub messages: Option<Vec<IncomingMessage>>,
}

/// Whether a promotion created a durable session or overwrote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PromoteAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOutcome {
    pub action: PromoteAction,
    /// Id of the durable session.
    pub id: Uuid,
    pub message_count: usize,
}

#[derive(Clone, Debug)]
pub struct SessionService {
    ephemeral: Arc<MemoryStore>,
    durable: Arc<SqliteStore>,
}

impl SessionService {
    pub fn new(ephemeral: Arc<MemoryStore>, durable: Arc<SqliteStore>) -> Self {
        Self { ephemeral, durable }
    }

    pub async fn create(
        &self,
        owner: Uuid,
        kind: SessionKind,
        title: Option<String>,
    ) -> Result<ChatSession, ServiceError> {
        let session = ChatSession::new(owner, kind, title, Utc::now());
        with_store!(self, kind, |store| store.insert_session(session.clone()).await)?;
        info!(session = %session.session_ref(), owner = %owner, "session created");
        Ok(session)
    }

    /// Sessions of `owner`, newest activity first. `None` lists both backends.
    pub async fn list(
        &self,
        owner: Uuid,
        kind: Option<SessionKind>,
    ) -> Result<Vec<ChatSession>, ServiceError> {
        let mut sessions = match kind {
            Some(kind) => with_store!(self, kind, |store| store.list_sessions(owner).await)?,
            None => {
                let mut all = self.ephemeral.list_sessions(owner).await?;
                all.extend(self.durable.list_sessions(owner).await?);
                all
            }
        };
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    pub async fn get(&self, owner: Uuid, session: SessionRef) -> Result<ChatSession, ServiceError> {
        self.authorize(owner, session).await?;
        with_store!(self, session.kind, |store| store.get_session(session.id).await)?
            .ok_or_else(|| not_found(session))
    }

    pub async fn update(
        &self,
        owner: Uuid,
        session: SessionRef,
        patch: SessionPatch,
    ) -> Result<ChatSession, ServiceError> {
        self.authorize(owner, session).await?;

        // Reject the whole patch before anything is written.
        let title = patch.title.as_deref().map(str::trim);
        if title.is_some_and(str::is_empty) {
            return Err(ServiceError::BadRequest("title must not be blank".into()));
        }

        if let Some(messages) = patch.messages {
            self.merge_checked(session, messages).await?;
        }
        if let Some(title) = title {
            with_store!(self, session.kind, |store| store.update_title(session.id, title).await)?
                .ok_or_else(|| not_found(session))?;
        }

        with_store!(self, session.kind, |store| store.get_session(session.id).await)?
            .ok_or_else(|| not_found(session))
    }

    pub async fn delete(&self, owner: Uuid, session: SessionRef) -> Result<(), ServiceError> {
        self.authorize(owner, session).await?;
        let deleted = with_store!(self, session.kind, |store| store.delete_session(session.id).await)?;
        if !deleted {
            return Err(not_found(session));
        }
        info!(session = %session, "session deleted");
        Ok(())
    }

    /// Single-message sink: appends unless the id is already stored, in which
    /// case the stored message is returned unchanged.
    pub async fn append_one(
        &self,
        owner: Uuid,
        session: SessionRef,
        message: IncomingMessage,
    ) -> Result<AppendOutcome, ServiceError> {
        let message = message.into_message(Utc::now())?;
        self.authorize(owner, session).await?;
        let outcome = with_store!(self, session.kind, |store| {
            store.append_message(session.id, message).await
        })?
        .ok_or_else(|| not_found(session))?;
        debug!(session = %session, appended = outcome.was_appended(), "single append");
        Ok(outcome)
    }

    /// Batch sink: set union by message id, preserving input order for the
    /// new messages.
    pub async fn append_batch(
        &self,
        owner: Uuid,
        session: SessionRef,
        messages: Vec<IncomingMessage>,
    ) -> Result<MergeOutcome, ServiceError> {
        self.authorize(owner, session).await?;
        self.merge_checked(session, messages).await
    }

    pub async fn messages(&self, owner: Uuid, session: SessionRef) -> Result<Vec<Message>, ServiceError> {
        self.authorize(owner, session).await?;
        with_store!(self, session.kind, |store| store.list_messages(session.id).await)?
            .ok_or_else(|| not_found(session))
    }

    /// Copy an ephemeral session into the durable store.
    ///
    /// The durable target is the owner's session with the same title; its
    /// messages are overwritten. Without a match a new durable session is
    /// created.
    pub async fn promote(&self, owner: Uuid, id: Uuid) -> Result<PromoteOutcome, ServiceError> {
        let source_ref = SessionRef::new(id, SessionKind::Ephemeral);
        self.authorize(owner, source_ref).await?;
        let source = self
            .ephemeral
            .get_session(id)
            .await?
            .ok_or_else(|| not_found(source_ref))?;

        let outcome = match self.durable.find_by_title(owner, &source.title).await? {
            Some(target) => {
                let message_count = self
                    .durable
                    .replace_messages(target, source.messages)
                    .await?
                    .ok_or_else(|| not_found(SessionRef::new(target, SessionKind::Durable)))?;
                PromoteOutcome {
                    action: PromoteAction::Updated,
                    id: target,
                    message_count,
                }
            }
            None => {
                let now = Utc::now();
                let mut copy = ChatSession::new(owner, SessionKind::Durable, Some(source.title), now);
                copy.merge_messages(source.messages, now);
                let outcome = PromoteOutcome {
                    action: PromoteAction::Created,
                    id: copy.id,
                    message_count: copy.message_count,
                };
                self.durable.insert_session(copy).await?;
                outcome
            }
        };

        info!(
            source = %source_ref,
            target = %outcome.id,
            action = %outcome.action,
            message_count = outcome.message_count,
            "session promoted to durable store"
        );
        Ok(outcome)
    }

    async fn merge_checked(
        &self,
        session: SessionRef,
        messages: Vec<IncomingMessage>,
    ) -> Result<MergeOutcome, ServiceError> {
        if messages.len() > MAX_BATCH_MESSAGES {
            return Err(ServiceError::BadRequest(format!(
                "batch too large ({} messages); maximum is {MAX_BATCH_MESSAGES}",
                messages.len()
            )));
        }
        let now = Utc::now();
        let messages = messages
            .into_iter()
            .map(|m| m.into_message(now))
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = with_store!(self, session.kind, |store| {
            store.merge_messages(session.id, messages).await
        })?
        .ok_or_else(|| not_found(session))?;
        debug!(
            session = %session,
            appended = outcome.appended,
            message_count = outcome.message_count,
            "batch merged"
        );
        Ok(outcome)
    }

    async fn authorize(&self, owner: Uuid, session: SessionRef) -> Result<(), ServiceError> {
        let found = with_store!(self, session.kind, |store| store.session_owner(session.id).await)?;
        match found {
            None => Err(not_found(session)),
            Some(actual) if actual != owner => Err(ServiceError::Forbidden(format!(
                "session {} belongs to another user",
                session.id
            ))),
            Some(_) => Ok(()),
        }
    }
}

fn not_found(session: SessionRef) -> ServiceError {
    ServiceError::NotFound(format!("chat session {} not found", session.id))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
