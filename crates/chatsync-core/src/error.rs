use thiserror::Error;

/// Failures raised by a [`crate::store::SessionStore`] or
/// [`crate::store::UserStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A writer panicked while holding the in-memory store lock.
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by [`crate::service::SessionService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The session does not exist in the addressed backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// The session exists but belongs to another user.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The request payload or id was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by [`crate::auth::AuthService`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    /// Hashing or verifying a password failed, or its worker task died.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while flushing to or fetching from a remote sink.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A flush or reload was requested with no active session.
    #[error("no active session")]
    NoSession,
}
