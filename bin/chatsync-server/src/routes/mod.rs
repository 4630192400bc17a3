//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `CHATSYNC_ENABLE_SWAGGER=false`)
//! - Health route
//! - `/v1` auth, session and message routes (bearer-token protected)

pub mod doc;
mod health;
mod v1;

use std::sync::Arc;

use axum::{Router, middleware};
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router(Arc::clone(&state)));

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chatsync_core::SqliteStore;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn app() -> Router {
        let store = SqliteStore::connect("sqlite::memory:").await.expect("in-memory sqlite");
        let config = Config {
            enable_swagger: false,
            ..Config::default()
        };
        build(Arc::new(AppState::new(config, store)))
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn sign_in(app: &Router, email: &str) -> String {
        let (status, _) = call(
            app,
            "POST",
            "/v1/auth/register",
            None,
            Some(json!({ "email": email, "password": "hunter22" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(
            app,
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": "hunter22" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_owned()
    }

    async fn create(app: &Router, token: &str, body: Value) -> String {
        let (status, session) = call(app, "POST", "/v1/sessions", Some(token), Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{session}");
        session["id"].as_str().unwrap().to_owned()
    }

    fn ids(messages: &Value) -> Vec<&str> {
        messages
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn trace_id_is_echoed_or_generated() {
        let app = app().await;
        let trace_id = "6f9619ff-8b86-4011-b42d-00c04fc964ff";
        let req = Request::get("/health")
            .header("x-trace-id", trace_id)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.headers()["x-trace-id"], trace_id);

        let req = Request::get("/health").header("x-trace-id", "nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let generated = resp.headers()["x-trace-id"].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
    }

    #[tokio::test]
    async fn account_lifecycle() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;

        let (status, me) = call(&app, "GET", "/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "ana@example.com");
        assert!(me.get("createdAt").is_some());

        let (status, _) = call(
            &app,
            "POST",
            "/v1/auth/register",
            None,
            Some(json!({ "email": "ANA@example.com", "password": "whatever1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": "ana@example.com", "password": "wrong-pass" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, "POST", "/v1/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let (status, body) = call(&app, "GET", "/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn sessions_require_a_valid_token() {
        let app = app().await;
        let (status, _) = call(&app, "GET", "/v1/sessions", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, "GET", "/v1/sessions", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn single_append_then_get() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let id = create(&app, &token, json!({})).await;
        let uri = format!("/v1/sessions/{id}/messages");

        let (status, stored) = call(
            &app,
            "POST",
            &uri,
            Some(&token),
            Some(json!({ "message": { "id": "m1", "role": "user", "content": "Hello" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["id"], "m1");

        // same id again: stored copy is returned unchanged
        let (status, stored) = call(
            &app,
            "POST",
            &uri,
            Some(&token),
            Some(json!({ "message": { "id": "m1", "role": "user", "content": "Edited" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["content"], "Hello");

        let (status, session) = call(&app, "GET", &format!("/v1/sessions/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&session["messages"]), vec!["m1"]);
        assert_eq!(session["messageCount"], 1);
        assert_eq!(session["title"], "Hello");
        assert_eq!(session["kind"], "ephemeral");
    }

    #[tokio::test]
    async fn overlapping_batches_merge_by_id_in_durable_store() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let id = create(&app, &token, json!({ "kind": "durable", "title": "Work" })).await;
        let uri = format!("/v1/sessions/{id}/messages?kind=durable");

        let (status, ack) = call(
            &app,
            "POST",
            &uri,
            Some(&token),
            Some(json!({ "messages": [
                { "id": "a", "role": "user", "content": "one" },
                { "id": "b", "role": "assistant", "content": "two" },
            ] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, json!({ "success": true, "appended": 2, "messageCount": 2 }));

        let (_, ack) = call(
            &app,
            "POST",
            &uri,
            Some(&token),
            Some(json!({ "messages": [
                { "id": "b", "role": "assistant", "content": "two" },
                { "id": "c", "role": "user", "content": "three" },
            ] })),
        )
        .await;
        assert_eq!(ack["appended"], 1);
        assert_eq!(ack["messageCount"], 3);

        let (status, messages) = call(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&messages), vec!["a", "b", "c"]);

        // the session lives only in the durable backend
        let (status, _) = call(&app, "GET", &format!("/v1/sessions/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let id = create(&app, &token, json!({ "title": "Scratch" })).await;
        let uri = format!("/v1/sessions/{id}");

        let (status, body) = call(&app, "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let (status, _) = call(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_sessions_are_forbidden() {
        let app = app().await;
        let owner = sign_in(&app, "ana@example.com").await;
        let intruder = sign_in(&app, "bo@example.com").await;
        let id = create(&app, &owner, json!({ "title": "Private" })).await;
        let session_uri = format!("/v1/sessions/{id}");
        let messages_uri = format!("/v1/sessions/{id}/messages");

        let attempts = [
            ("GET", session_uri.as_str(), None),
            ("PUT", session_uri.as_str(), Some(json!({ "title": "Mine now" }))),
            ("DELETE", session_uri.as_str(), None),
            ("GET", messages_uri.as_str(), None),
            (
                "POST",
                messages_uri.as_str(),
                Some(json!({ "message": { "role": "user", "content": "hi" } })),
            ),
        ];
        for (method, uri, body) in attempts {
            let (status, _) = call(&app, method, uri, Some(&intruder), body).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        }

        let (_, listed) = call(&app, "GET", "/v1/sessions", Some(&intruder), None).await;
        assert_eq!(listed, json!([]));
        let (status, session) = call(&app, "GET", &session_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["title"], "Private");
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let id = create(&app, &token, json!({})).await;
        let uri = format!("/v1/sessions/{id}/messages");

        let (status, body) = call(&app, "GET", "/v1/sessions/not-a-uuid", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid session id"));

        let (status, _) = call(&app, "GET", &format!("{uri}?kind=cloud"), Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad_bodies = [
            json!({}),
            json!({ "message": { "role": "user", "content": "x" }, "messages": [] }),
            json!({ "message": { "content": "no role" } }),
            json!({ "messages": [{ "role": "user" }] }),
        ];
        for body in bad_bodies {
            let (status, _) = call(&app, "POST", &uri, Some(&token), Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        }

        // Bodies that do not deserialize at all get the same 400 JSON error.
        let wrong_types = [
            json!({ "messages": "x" }),
            json!({ "message": { "role": 5 } }),
            json!(["not", "an", "object"]),
        ];
        for body in wrong_types {
            let (status, error) = call(&app, "POST", &uri, Some(&token), Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert!(error["error"].is_string(), "{body} -> {error}");
        }

        let req = Request::builder()
            .method("POST")
            .uri(&uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(r#"{"message":{"role":"user","content":"x"}}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "missing content-type");

        let req = Request::builder()
            .method("POST")
            .uri("/v1/auth/login")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let error: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(error["error"].is_string());

        let (status, _) = call(
            &app,
            "PUT",
            &format!("/v1/sessions/{id}"),
            Some(&token),
            Some(json!({ "title": "   ", "messages": [{ "id": "a", "role": "user", "content": "x" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let oversized: Vec<Value> = (0..1001)
            .map(|i| json!({ "id": i.to_string(), "role": "user", "content": "x" }))
            .collect();
        let (status, _) = call(&app, "POST", &uri, Some(&token), Some(json!({ "messages": oversized }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, messages) = call(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(messages, json!([]));
    }

    #[tokio::test]
    async fn put_merges_messages_and_renames() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let id = create(&app, &token, json!({})).await;
        let uri = format!("/v1/sessions/{id}");

        let (status, session) = call(
            &app,
            "PUT",
            &uri,
            Some(&token),
            Some(json!({ "messages": [{ "id": "a", "role": "user", "content": "Plan a trip to Lisbon" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["title"], "Plan a trip to Lisbon");

        let (_, session) = call(
            &app,
            "PUT",
            &uri,
            Some(&token),
            Some(json!({
                "title": "Lisbon",
                "messages": [{ "id": "b", "role": "assistant", "content": "Sure" }]
            })),
        )
        .await;
        assert_eq!(session["title"], "Lisbon");
        assert_eq!(ids(&session["messages"]), vec!["a", "b"]);

        let (status, _) = call(&app, "PUT", &uri, Some(&token), Some(json!({ "title": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_spans_both_backends_without_messages() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let eph = create(&app, &token, json!({ "title": "Quick" })).await;
        let dur = create(&app, &token, json!({ "title": "Kept", "kind": "durable" })).await;
        call(
            &app,
            "POST",
            &format!("/v1/sessions/{dur}/messages?kind=durable"),
            Some(&token),
            Some(json!({ "message": { "role": "user", "content": "hi" } })),
        )
        .await;

        let (status, all) = call(&app, "GET", "/v1/sessions", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let all = all.as_array().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s["messages"] == json!([])));
        // most recently updated first
        assert_eq!(all[0]["id"], dur.as_str());
        assert_eq!(all[0]["messageCount"], 1);
        assert_eq!(all[1]["id"], eph.as_str());

        let (_, durable) = call(&app, "GET", "/v1/sessions?kind=durable", Some(&token), None).await;
        assert_eq!(ids(&durable), vec![dur.as_str()]);
    }

    #[tokio::test]
    async fn promote_creates_then_updates_durable_copy() {
        let app = app().await;
        let token = sign_in(&app, "ana@example.com").await;
        let id = create(&app, &token, json!({ "title": "Trip plans" })).await;
        let messages_uri = format!("/v1/sessions/{id}/messages");
        let promote_uri = format!("/v1/sessions/{id}/promote");

        call(
            &app,
            "POST",
            &messages_uri,
            Some(&token),
            Some(json!({ "messages": [
                { "id": "a", "role": "user", "content": "where to?" },
                { "id": "b", "role": "assistant", "content": "Lisbon" },
            ] })),
        )
        .await;

        let (status, first) = call(&app, "POST", &promote_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["success"], true);
        assert_eq!(first["action"], "created");
        assert_eq!(first["messageCount"], 2);

        call(
            &app,
            "POST",
            &messages_uri,
            Some(&token),
            Some(json!({ "message": { "id": "c", "role": "user", "content": "when?" } })),
        )
        .await;
        let (_, second) = call(&app, "POST", &promote_uri, Some(&token), None).await;
        assert_eq!(second["action"], "updated");
        assert_eq!(second["id"], first["id"]);
        assert_eq!(second["messageCount"], 3);

        let durable_id = first["id"].as_str().unwrap();
        let (status, copy) = call(
            &app,
            "GET",
            &format!("/v1/sessions/{durable_id}?kind=durable"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(copy["kind"], "durable");
        assert_eq!(ids(&copy["messages"]), vec!["a", "b", "c"]);

        let (status, _) = call(&app, "POST", &format!("{promote_uri}?kind=durable"), Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
