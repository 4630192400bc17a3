use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_allowed_origins
        .as_deref()
        .map(|list| list.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();

    // Wildcard when unset; set CHATSYNC_CORS_ORIGINS in production.
    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };
    cors.allow_headers(Any).allow_methods(Any)
}
