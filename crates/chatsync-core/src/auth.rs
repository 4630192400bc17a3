//! Account registration, login and bearer-token resolution.
//!
//! Passwords are stored as Argon2id hashes in PHC string form. Hashing and
//! verification are CPU-bound and run on the blocking thread pool. Tokens are
//! opaque random strings persisted with an expiry; the HTTP layer turns a
//! resolved token into an [`Identity`].

use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::info;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::{SqliteStore, UserRecord, UserStore};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_CHARS: usize = 6;

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(r: UserRecord) -> Self {
        Self {
            id: r.id,
            email: r.email,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

/// A freshly issued bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Clone, Debug)]
pub struct AuthService {
    store: Arc<SqliteStore>,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Arc<SqliteStore>, token_ttl: Duration) -> Self {
        Self { store, token_ttl }
    }

    /// Create an account. The display name defaults to the local part of the
    /// email address.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_owned());

        let record = UserRecord {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash: hash_password(password.to_owned()).await?,
            created_at: Utc::now(),
        };
        if !self.store.insert_user(record.clone()).await? {
            return Err(AuthError::EmailTaken);
        }
        info!(user_id = %record.id, "user registered");
        Ok(record.into())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let record = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password.to_owned(), record.password_hash.clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let token = new_token();
        let expires_at = Utc::now() + self.token_ttl;
        self.store.insert_token(&token, record.id, expires_at).await?;
        info!(user_id = %record.id, "user logged in");
        Ok(IssuedToken {
            token,
            expires_at,
            user: record.into(),
        })
    }

    /// Map a bearer token to its identity; expired or unknown tokens yield `None`.
    pub async fn resolve(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let user_id = self.store.resolve_token(token, Utc::now()).await?;
        Ok(user_id.map(|user_id| Identity { user_id }))
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.store.delete_token(token).await?;
        Ok(())
    }

    pub async fn user(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.store.get_user(id).await?.map(User::from))
    }
}

fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::InvalidInput("a valid email address is required".into())),
    }
}

/// Hash with a fresh random salt; returns the PHC string.
async fn hash_password(password: String) -> Result<String, AuthError> {
    task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| AuthError::Hashing(e.to_string()))?
    .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// `Ok(false)` on a mismatch; `Err` only when the stored hash is unreadable.
async fn verify_password(password: String, stored: String) -> Result<bool, AuthError> {
    task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored)?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(|e| AuthError::Hashing(e.to_string()))?
    .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
