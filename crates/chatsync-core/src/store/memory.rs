//! Ephemeral session store.
//!
//! Created once at process start and injected through the application state;
//! its contents disappear on restart. Every mutation runs under a single
//! write lock, so appends and merges on one session are serialized.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use uuid::Uuid;

use super::SessionStore;
use crate::error::StoreError;
use crate::merge::{AppendOutcome, MergeOutcome};
use crate::model::{ChatSession, Message};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, ChatSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Uuid, ChatSession>>, StoreError> {
        self.sessions.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Uuid, ChatSession>>, StoreError> {
        self.sessions.write().map_err(|_| StoreError::Poisoned)
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ChatSession) -> T,
    ) -> Result<Option<T>, StoreError> {
        Ok(self.write()?.get_mut(&id).map(f))
    }
}

impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: ChatSession) -> Result<(), StoreError> {
        self.write()?.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn session_owner(&self, id: Uuid) -> Result<Option<Uuid>, StoreError> {
        Ok(self.read()?.get(&id).map(|s| s.owner_id))
    }

    async fn list_sessions(&self, owner_id: Uuid) -> Result<Vec<ChatSession>, StoreError> {
        let mut sessions: Vec<ChatSession> = self
            .read()?
            .values()
            .filter(|s| s.owner_id == owner_id)
            .map(|s| s.clone().summary())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn update_title(&self, id: Uuid, title: &str) -> Result<Option<ChatSession>, StoreError> {
        self.with_session(id, |s| {
            s.title = title.to_owned();
            s.updated_at = Utc::now();
            s.clone()
        })
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.write()?.remove(&id).is_some())
    }

    async fn append_message(
        &self,
        id: Uuid,
        message: Message,
    ) -> Result<Option<AppendOutcome>, StoreError> {
        self.with_session(id, |s| s.append_message(message, Utc::now()))
    }

    async fn merge_messages(
        &self,
        id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Option<MergeOutcome>, StoreError> {
        self.with_session(id, |s| s.merge_messages(messages, Utc::now()))
    }

    async fn replace_messages(
        &self,
        id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Option<usize>, StoreError> {
        self.with_session(id, |s| {
            s.replace_messages(messages, Utc::now());
            s.message_count
        })
    }

    async fn list_messages(&self, id: Uuid) -> Result<Option<Vec<Message>>, StoreError> {
        Ok(self.read()?.get(&id).map(|s| s.messages.clone()))
    }

    async fn find_by_title(&self, owner_id: Uuid, title: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .read()?
            .values()
            .filter(|s| s.owner_id == owner_id && s.title == title)
            .max_by_key(|s| s.updated_at)
            .map(|s| s.id))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
