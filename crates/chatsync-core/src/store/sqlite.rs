//! SQLite implementation of [`SessionStore`] and [`UserStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations are run automatically
//! on startup via [`SqliteStore::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR` (the crate root), so the directory is
//! embedded into the binary.
//!
//! # Queries
//!
//! The `sqlx::query` (runtime-verified) form is used so that no
//! `DATABASE_URL` environment variable is needed at compile time. Every
//! message mutation runs inside one transaction; message order is kept in
//! an explicit `position` column.
//!
//! # Concurrency
//!
//! Write transactions open with `BEGIN IMMEDIATE`, so the database write lock
//! is taken up front. Concurrent writers wait up to [`BUSY_TIMEOUT`] for it;
//! a deferred transaction would instead fail with `SQLITE_BUSY` when it tries
//! to upgrade its read lock.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use super::{SessionStore, UserRecord, UserStore};
use crate::error::StoreError;
use crate::merge::{self, AppendOutcome, MergeOutcome};
use crate::model::{derive_title, ChatSession, Message, Role, SessionKind, DEFAULT_TITLE};

type SessionRow = (String, String, String, i64, String, String);
type MessageRow = (String, String, String, String);
type UserRow = (String, String, String, String, String);

const SESSION_COLUMNS: &str = "id, owner_id, title, message_count, created_at, updated_at";
const USER_COLUMNS: &str = "id, email, name, password_hash, created_at";

/// How long a writer waits for the database lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed durable store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://chatsync.db"`
    /// or `"sqlite::memory:"` for tests. In-memory databases are pinned to a
    /// single connection that is never recycled, since each connection would
    /// otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open a transaction that already holds the write lock.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so that `ORDER BY` on the text column is
/// chronological.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str, column: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, column, error = %e, "failed to parse timestamp; using now");
        Utc::now()
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn session_from_row(row: SessionRow) -> Result<ChatSession, StoreError> {
    let (id, owner_id, title, message_count, created_at, updated_at) = row;
    Ok(ChatSession {
        id: parse_uuid(&id)?,
        kind: SessionKind::Durable,
        owner_id: parse_uuid(&owner_id)?,
        title,
        messages: Vec::new(),
        message_count: usize::try_from(message_count).unwrap_or_default(),
        created_at: parse_ts(&created_at, "chat_sessions.created_at"),
        updated_at: parse_ts(&updated_at, "chat_sessions.updated_at"),
    })
}

fn message_from_row(row: MessageRow) -> Message {
    let (id, role, content, created_at) = row;
    Message {
        id,
        role: Role::from(role),
        content,
        created_at: parse_ts(&created_at, "chat_messages.created_at"),
    }
}

fn user_from_row(row: UserRow) -> Result<UserRecord, StoreError> {
    let (id, email, name, password_hash, created_at) = row;
    Ok(UserRecord {
        id: parse_uuid(&id)?,
        email,
        name,
        password_hash,
        created_at: parse_ts(&created_at, "users.created_at"),
    })
}

// ── Transaction helpers ───────────────────────────────────────────────────────

async fn session_title(conn: &mut SqliteConnection, id: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT title FROM chat_sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

async fn next_position(conn: &mut SqliteConnection, id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM chat_messages WHERE session_id = ?1",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
}

async fn insert_messages(
    conn: &mut SqliteConnection,
    id: &str,
    first_position: i64,
    messages: &[Message],
) -> Result<(), sqlx::Error> {
    for (offset, m) in (0_i64..).zip(messages) {
        sqlx::query(
            "INSERT INTO chat_messages (session_id, id, position, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id)
        .bind(&m.id)
        .bind(first_position + offset)
        .bind(m.role.as_str())
        .bind(&m.content)
        .bind(ts(m.created_at))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Recompute the cached count, refresh `updated_at` and derive the title if
/// it is still the placeholder. Returns the new count.
async fn touch_session(
    conn: &mut SqliteConnection,
    id: &str,
    title: &str,
    now: DateTime<Utc>,
) -> Result<usize, sqlx::Error> {
    sqlx::query(
        "UPDATE chat_sessions \
         SET message_count = (SELECT COUNT(*) FROM chat_messages WHERE session_id = ?1), \
             updated_at = ?2 \
         WHERE id = ?1",
    )
    .bind(id)
    .bind(ts(now))
    .execute(&mut *conn)
    .await?;

    if title == DEFAULT_TITLE {
        let first_user: Option<String> = sqlx::query_scalar(
            "SELECT content FROM chat_messages WHERE session_id = ?1 AND role = 'user' \
             ORDER BY position ASC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(derived) = first_user.as_deref().and_then(derive_title) {
            sqlx::query("UPDATE chat_sessions SET title = ?1 WHERE id = ?2")
                .bind(derived)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }

    let count: i64 = sqlx::query_scalar("SELECT message_count FROM chat_sessions WHERE id = ?1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(usize::try_from(count).unwrap_or_default())
}

// ── SessionStore ──────────────────────────────────────────────────────────────

impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: ChatSession) -> Result<(), StoreError> {
        let id = session.id.to_string();
        let mut tx = self.begin_write().await?;
        sqlx::query(
            "INSERT INTO chat_sessions (id, owner_id, title, message_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&id)
        .bind(session.owner_id.to_string())
        .bind(&session.title)
        .bind(session.messages.len() as i64)
        .bind(ts(session.created_at))
        .bind(ts(session.updated_at))
        .execute(&mut *tx)
        .await?;
        insert_messages(&mut tx, &id, 0, &session.messages).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut session = session_from_row(row)?;
        session.messages = self.list_messages(id).await?.unwrap_or_default();
        Ok(Some(session))
    }

    async fn session_owner(&self, id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM chat_sessions WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        owner.as_deref().map(parse_uuid).transpose()
    }

    async fn list_sessions(&self, owner_id: Uuid) -> Result<Vec<ChatSession>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE owner_id = ?1 ORDER BY updated_at DESC"
        ))
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(session_from_row).collect()
    }

    async fn update_title(&self, id: Uuid, title: &str) -> Result<Option<ChatSession>, StoreError> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(ts(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_session(id).await
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let id = id.to_string();
        let mut tx = self.begin_write().await?;
        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(
        &self,
        id: Uuid,
        message: Message,
    ) -> Result<Option<AppendOutcome>, StoreError> {
        let sid = id.to_string();
        let mut tx = self.begin_write().await?;
        let Some(title) = session_title(&mut tx, &sid).await? else {
            return Ok(None);
        };

        let existing: Option<MessageRow> = sqlx::query_as(
            "SELECT id, role, content, created_at FROM chat_messages \
             WHERE session_id = ?1 AND id = ?2",
        )
        .bind(&sid)
        .bind(&message.id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Ok(Some(AppendOutcome::Existing(message_from_row(row))));
        }

        let position = next_position(&mut tx, &sid).await?;
        insert_messages(&mut tx, &sid, position, std::slice::from_ref(&message)).await?;
        let count = touch_session(&mut tx, &sid, &title, Utc::now()).await?;
        tx.commit().await?;

        tracing::debug!(session_id = %sid, message_id = %message.id, message_count = count, "message appended");
        Ok(Some(AppendOutcome::Appended(message)))
    }

    async fn merge_messages(
        &self,
        id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Option<MergeOutcome>, StoreError> {
        let sid = id.to_string();
        let mut tx = self.begin_write().await?;
        let Some(title) = session_title(&mut tx, &sid).await? else {
            return Ok(None);
        };

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chat_messages WHERE session_id = ?1")
                .bind(&sid)
                .fetch_all(&mut *tx)
                .await?;
        let fresh = merge::unseen(existing.iter().map(String::as_str), messages);

        if fresh.is_empty() {
            return Ok(Some(MergeOutcome {
                appended: 0,
                message_count: existing.len(),
            }));
        }

        let position = next_position(&mut tx, &sid).await?;
        insert_messages(&mut tx, &sid, position, &fresh).await?;
        let message_count = touch_session(&mut tx, &sid, &title, Utc::now()).await?;
        tx.commit().await?;

        tracing::debug!(session_id = %sid, appended = fresh.len(), message_count, "messages merged");
        Ok(Some(MergeOutcome {
            appended: fresh.len(),
            message_count,
        }))
    }

    async fn replace_messages(
        &self,
        id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Option<usize>, StoreError> {
        let sid = id.to_string();
        let mut tx = self.begin_write().await?;
        let Some(title) = session_title(&mut tx, &sid).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?1")
            .bind(&sid)
            .execute(&mut *tx)
            .await?;
        let deduped = merge::unseen(std::iter::empty::<&str>(), messages);
        insert_messages(&mut tx, &sid, 0, &deduped).await?;
        let count = touch_session(&mut tx, &sid, &title, Utc::now()).await?;
        tx.commit().await?;
        Ok(Some(count))
    }

    async fn list_messages(&self, id: Uuid) -> Result<Option<Vec<Message>>, StoreError> {
        let sid = id.to_string();
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM chat_sessions WHERE id = ?1")
            .bind(&sid)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, role, content, created_at FROM chat_messages \
             WHERE session_id = ?1 ORDER BY position ASC",
        )
        .bind(&sid)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(rows.into_iter().map(message_from_row).collect()))
    }

    async fn find_by_title(&self, owner_id: Uuid, title: &str) -> Result<Option<Uuid>, StoreError> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM chat_sessions WHERE owner_id = ?1 AND title = ?2 \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(owner_id.to_string())
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        id.as_deref().map(parse_uuid).transpose()
    }
}

// ── UserStore ─────────────────────────────────────────────────────────────────

impl UserStore for SqliteStore {
    async fn insert_user(&self, user: UserRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(ts(user.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(user_from_row).transpose()
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(user_from_row).transpose()
    }

    async fn insert_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.begin_write().await?;
        let pruned = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?1")
            .bind(ts(now))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            "INSERT INTO auth_tokens (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token)
        .bind(user_id.to_string())
        .bind(ts(now))
        .bind(ts(expires_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if pruned > 0 {
            tracing::debug!(pruned, "expired auth tokens removed");
        }
        Ok(())
    }

    async fn resolve_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Uuid>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT user_id, expires_at FROM auth_tokens WHERE token = ?1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        let Some((user_id, expires_at)) = row else {
            return Ok(None);
        };
        if parse_ts(&expires_at, "auth_tokens.expires_at") <= now {
            return Ok(None);
        }
        parse_uuid(&user_id).map(Some)
    }

    async fn delete_token(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_tokens WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
