//! Transport to the chat service: streaming sends, history reads and clears

use std::{sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use reqwest_eventsource::{Event, EventSource, retry::Never};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{AuthPolicy, CredentialProvider, StaticToken},
    error::{Error, Result},
    stream::{ChatEventStream, StreamFrame, decode_frame},
    types::ChatMessage,
};

/// Transport for talking to an agent's conversation
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `text` to the conversation and stream the reply.
    ///
    /// Once `cancel` fires the returned stream yields nothing more.
    async fn stream(
        &self,
        conversation_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<ChatEventStream>;

    /// Read persisted history, oldest first. No history is an empty vec.
    async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>>;

    /// Delete persisted history
    async fn clear(&self, conversation_id: &str) -> Result<()>;
}

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

/// HTTP transport backed by `reqwest` and server-sent events
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    history_limit: u32,
    request_timeout: Duration,
}

/// Builder for [`HttpTransport`]
pub struct HttpTransportBuilder {
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    history_limit: u32,
    connect_timeout: Duration,
    request_timeout: Duration,
    read_timeout: Duration,
}

impl HttpTransportBuilder {
    /// Set the credential provider
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Maximum number of history entries to request
    pub fn history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    /// Timeout for establishing a connection
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Total timeout for history and clear requests
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Maximum silence on an open stream. The service pings every 15s.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| Error::InvalidConfig(format!("invalid base URL {:?}: {}", self.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "base URL cannot carry a path: {}",
                self.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()?;

        Ok(HttpTransport {
            client,
            base_url,
            credentials: self.credentials,
            history_limit: self.history_limit,
            request_timeout: self.request_timeout,
        })
    }
}

impl HttpTransport {
    /// Start building a transport for the service at `base_url`
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            base_url: base_url.into(),
            credentials: Arc::new(StaticToken::none()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(300),
        }
    }

    /// `{base}/chat/{conversation_id}[/{suffix}]`
    fn chat_url(&self, conversation_id: &str, suffix: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidConfig(format!("bad base URL: {}", self.base_url)))?;
            segments.pop_if_empty().push("chat").push(conversation_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        policy: AuthPolicy,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(match policy.resolve(self.credentials.token().await)? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn stream(
        &self,
        conversation_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<ChatEventStream> {
        let url = self.chat_url(conversation_id, None)?;
        let request = self
            .client
            .post(url)
            .json(&SendRequest { message: text });
        let request = self.authorize(request, AuthPolicy::Required).await?;

        let mut event_source = EventSource::new(request)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;
        // A reconnect would re-send the user's message
        event_source.set_retry_policy(Box::new(Never));

        tracing::debug!(conversation_id, "opening chat stream");
        Ok(Box::pin(create_stream(event_source, cancel)))
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let url = self.chat_url(conversation_id, Some("history"))?;
        let request = self
            .client
            .get(url)
            .query(&[("limit", self.history_limit)])
            .timeout(self.request_timeout);
        let response = self
            .authorize(request, AuthPolicy::Optional)
            .await?
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), error_detail(body)));
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let body: HistoryResponse = serde_json::from_slice(&bytes)?;
        Ok(decode_history(body.messages))
    }

    async fn clear(&self, conversation_id: &str) -> Result<()> {
        let url = self.chat_url(conversation_id, None)?;
        let request = self.client.delete(url).timeout(self.request_timeout);
        let response = self
            .authorize(request, AuthPolicy::Required)
            .await?
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), error_detail(body)));
        }
        Ok(())
    }
}

/// Decode history entries, skipping any this client cannot represent
fn decode_history(entries: Vec<serde_json::Value>) -> Vec<ChatMessage> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<ChatMessage>(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("Skipping history entry: {}", e);
                None
            }
        })
        .collect()
}

/// Pull `detail` out of a JSON error body, falling back to the raw text
fn error_detail(body: String) -> String {
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body)
}

async fn source_error(err: reqwest_eventsource::Error) -> Error {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            Error::from_status(status.as_u16(), error_detail(body))
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, _) => {
            Error::Sse(format!("unexpected content type: {:?}", content_type))
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

/// The service always ends a reply with `done`; EOF before it means the
/// connection was cut
fn truncated() -> Error {
    Error::Sse("stream ended before done".into())
}

fn create_stream(
    mut event_source: EventSource,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ChatMessage>> {
    stream! {
        // The service forwards proactive messages after `done`, so keep reading
        // until EOF but stop treating failures as errors. EOF before `done` is
        // an error.
        let mut done = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = event_source.next() => Some(event),
            };
            let Some(event) = next else {
                tracing::debug!("chat stream cancelled");
                event_source.close();
                return;
            };
            let Some(event) = event else {
                if !done {
                    yield Err(truncated());
                }
                break;
            };

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => match decode_frame(&msg.data) {
                    Ok(StreamFrame::Message(message)) => yield Ok(message),
                    Ok(StreamFrame::Done) => done = true,
                    Ok(StreamFrame::Keepalive) => {}
                    Ok(StreamFrame::Unknown(ty)) => {
                        tracing::warn!("Skipping unknown stream frame type: {}", ty);
                    }
                    Err(e) if done => {
                        tracing::warn!("Ignoring bad frame after done: {}", e);
                        break;
                    }
                    Err(e) => {
                        event_source.close();
                        yield Err(e);
                        return;
                    }
                },
                Err(reqwest_eventsource::Error::StreamEnded) if done => break,
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    event_source.close();
                    yield Err(truncated());
                    return;
                }
                Err(e) if done => {
                    tracing::debug!("Stream failed after done: {}", e);
                    break;
                }
                Err(e) => {
                    event_source.close();
                    yield Err(source_error(e).await);
                    return;
                }
            }
        }

        event_source.close();
    }
}
