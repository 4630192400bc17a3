//! Chat session persistence and client-side synchronization.
//!
//! The server side is [`service::SessionService`] over two
//! [`store::SessionStore`] backends plus [`auth::AuthService`]. The client
//! side is [`sync::Synchronizer`], which keeps a local copy of the active
//! session and flushes it to a [`sync::SessionRemote`].

pub mod auth;
pub mod error;
pub mod merge;
pub mod model;
pub mod service;
pub mod store;
pub mod sync;

pub use auth::{AuthService, Identity, IssuedToken, User};
pub use error::{AuthError, ServiceError, StoreError, SyncError};
pub use merge::{AppendOutcome, MergeOutcome};
pub use model::{ChatSession, IncomingMessage, Message, Role, SessionKind, SessionRef};
pub use service::{MAX_BATCH_MESSAGES, PromoteAction, PromoteOutcome, SessionPatch, SessionService};
pub use store::{MemoryStore, SqliteStore};
pub use sync::{HttpRemote, SessionRemote, SyncSettings, Synchronizer};
