use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Wrap each request in a span keyed by a trace id.
///
/// A valid UUID in `x-trace-id` is reused, otherwise one is generated; the id
/// is forwarded to handlers and echoed on the response. Bodies are never
/// logged since auth requests carry passwords.
pub async fn trace_middleware(mut req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let header_value = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        info!("→ request started");
        if let Some(value) = header_value.clone() {
            req.headers_mut().insert(X_TRACE_ID, value);
        }

        let mut response = next.run(req).await;

        if let Some(value) = header_value {
            response.headers_mut().insert(X_TRACE_ID, value);
        }
        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response finished"
        );
        response
    }
    .instrument(span)
    .await
}
