use crate::routes::{health, v1};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "chatsync-server",
        description = "Chat sessions with merge-by-id message sync",
        version = "0.1.0",
    ),
    tags(
        (name = "auth", description = "Accounts and bearer tokens"),
        (name = "sessions", description = "Chat session CRUD and promotion"),
        (name = "messages", description = "Message sink"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(v1::api_docs());
    root
}
