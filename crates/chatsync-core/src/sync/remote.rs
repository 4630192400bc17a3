//! Transport between the synchronizer and the message sink.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::SyncError;
use crate::model::{Message, SessionRef};

/// Default per-request timeout for [`HttpRemote`].
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where flushed messages go and where reloads come from.
pub trait SessionRemote: Send + Sync + 'static {
    /// Merge `messages` into the stored session; returns the stored count.
    fn append_batch(
        &self,
        session: SessionRef,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<usize, SyncError>> + Send;

    /// The store's authoritative message list for `session`.
    fn fetch_messages(
        &self,
        session: SessionRef,
    ) -> impl Future<Output = Result<Vec<Message>, SyncError>> + Send;

    /// Fire a final flush whose response body is never read. Used on unload.
    fn beacon(
        &self,
        session: SessionRef,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchAck {
    message_count: usize,
}

/// [`SessionRemote`] over the server's `/v1` JSON API.
#[derive(Clone, Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    /// `base_url` is the server root, e.g. `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            client,
            base_url,
            token: token.into(),
        }
    }

    fn messages_url(&self, session: SessionRef) -> String {
        format!(
            "{}/v1/sessions/{}/messages?kind={}",
            self.base_url, session.id, session.kind
        )
    }

    fn post_batch(&self, session: SessionRef, messages: &[Message]) -> reqwest::RequestBuilder {
        self.client
            .post(self.messages_url(session))
            .bearer_auth(&self.token)
            .json(&json!({ "messages": messages }))
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

impl SessionRemote for HttpRemote {
    async fn append_batch(&self, session: SessionRef, messages: Vec<Message>) -> Result<usize, SyncError> {
        let resp = self.post_batch(session, &messages).send().await?;
        let ack: BatchAck = ensure_success(resp).await?.json().await?;
        debug!(%session, sent = messages.len(), message_count = ack.message_count, "batch acknowledged");
        Ok(ack.message_count)
    }

    async fn fetch_messages(&self, session: SessionRef) -> Result<Vec<Message>, SyncError> {
        let resp = self
            .client
            .get(self.messages_url(session))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    async fn beacon(&self, session: SessionRef, messages: Vec<Message>) -> Result<(), SyncError> {
        let resp = self.post_batch(session, &messages).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
