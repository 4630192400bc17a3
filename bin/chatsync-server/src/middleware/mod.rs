//! HTTP middleware stack.

pub mod auth;
pub mod cors;
pub mod trace;

pub use auth::{BearerToken, require_identity};
