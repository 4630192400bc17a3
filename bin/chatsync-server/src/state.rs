//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use chatsync_core::{AuthService, MemoryStore, SessionService, SqliteStore};

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Session routing over the ephemeral and durable stores.
    pub sessions: SessionService,
    /// Accounts and bearer tokens.
    pub auth: AuthService,
}

impl AppState {
    /// Wire both stores into the services. The memory store lives exactly as
    /// long as this state.
    pub fn new(config: Config, durable: SqliteStore) -> Self {
        let durable = Arc::new(durable);
        let auth = AuthService::new(Arc::clone(&durable), config.token_ttl());
        Self {
            sessions: SessionService::new(Arc::new(MemoryStore::new()), durable),
            auth,
            config: Arc::new(config),
        }
    }
}
