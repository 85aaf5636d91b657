//! DeepSeekClient - REST client for DeepSeek-compatible chat completions.
//!
//! Calls `POST {base_url}/chat/completions` with bearer authentication. The
//! streaming variant decodes the event-stream body lazily; nothing is read
//! from the connection until the returned stream is polled.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use seekchat_core::api::{
    ChatClientFactory, ChatCompletionApi, ChatRequest, CompletionStream, ResponseChoice,
    ResponseChunk, StreamEvent,
};
use seekchat_core::config::DEFAULT_BASE_URL;
use seekchat_core::error::{ChatError, Result};
use tokio_util::sync::CancellationToken;

use crate::sse::{SseDecoder, SseEvent};

const UNKNOWN_ERROR: &str = "Unknown error";

/// Chat-completion client bound to one API key.
#[derive(Clone)]
pub struct DeepSeekClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl DeepSeekClient {
    /// Creates a client for the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MissingApiKey` when `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_http_client(Client::new(), api_key, DEFAULT_BASE_URL)
    }

    /// Creates a client sharing an existing connection pool.
    pub fn with_http_client(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ChatError::MissingApiKey(
                "an API key is required to create a client".into(),
            ));
        }
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send_request(&self, body: &ChatRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("DeepSeek API request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatCompletionApi for DeepSeekClient {
    async fn create_chat_completion(&self, request: &ChatRequest) -> Result<ResponseChoice> {
        let response = self.send_request(&request.streaming(false)).await?;
        let parsed: ResponseChunk = response.json().await.map_err(|err| {
            ChatError::Transport(format!("Failed to parse DeepSeek response: {err}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Transport("DeepSeek API returned no choices".into()))
    }

    async fn create_streaming_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        let request_body = request.streaming(true);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(target: "seekchat::stream", "cancelled before the response arrived");
                return Err(ChatError::Cancelled);
            }
            response = self.send_request(&request_body) => response?,
        };
        tracing::debug!(
            target: "seekchat::stream",
            model = %request.model,
            "streaming response opened"
        );
        Ok(event_stream(response.bytes_stream().boxed(), cancel))
    }
}

/// Builds [`DeepSeekClient`]s that share one connection pool.
pub struct DeepSeekClientFactory {
    client: Client,
    base_url: String,
}

impl DeepSeekClientFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for DeepSeekClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ChatClientFactory for DeepSeekClientFactory {
    fn create(&self, api_key: &str) -> Result<Arc<dyn ChatCompletionApi>> {
        let client = DeepSeekClient::with_http_client(self.client.clone(), api_key, &self.base_url)?;
        Ok(Arc::new(client))
    }
}

/// Extracts the server's error message from a failed response body.
///
/// Accepts a top-level `message` or an OpenAI-style `error.message`.
fn map_http_error(status: StatusCode, body: &str) -> ChatError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| value.pointer("/error/message").and_then(|m| m.as_str()))
                .map(str::to_string)
        })
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());

    ChatError::Api {
        status: status.as_u16(),
        message,
    }
}

type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

enum Read {
    Chunk(Bytes),
    End,
    Cancelled,
}

/// Pull-based reader turning a response body into [`StreamEvent`]s.
struct EventReader {
    body: Option<ByteStream>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    cancel: CancellationToken,
}

impl EventReader {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let body = self.body.as_mut()?;

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Read::Cancelled,
                item = body.next() => match item {
                    Some(Ok(bytes)) => Read::Chunk(bytes),
                    Some(Err(err)) => {
                        tracing::warn!(target: "seekchat::stream", "stream read failed: {}", err);
                        Read::End
                    }
                    None => Read::End,
                },
            };

            match read {
                Read::Chunk(bytes) => {
                    let events = self.decoder.push(&bytes);
                    self.enqueue(events);
                }
                Read::End => {
                    let events = self.decoder.finish();
                    self.enqueue(events);
                    self.close();
                }
                Read::Cancelled => {
                    tracing::debug!(target: "seekchat::stream", "stream cancelled");
                    self.close();
                }
            }
        }
    }

    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::KeepAlive => {
                    tracing::trace!(target: "seekchat::stream", "keep-alive");
                }
                SseEvent::Done => {
                    self.close();
                    return;
                }
                SseEvent::Data(data) => match serde_json::from_str::<ResponseChunk>(&data) {
                    Ok(chunk) => {
                        if let Some(choice) = chunk.choices.into_iter().next() {
                            self.pending.push_back(StreamEvent::Fragment(choice));
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "seekchat::stream",
                            "skipping malformed fragment: {} ({})",
                            err,
                            data
                        );
                    }
                },
            }
        }
    }

    /// Drops the body and queues the terminal event.
    fn close(&mut self) {
        if self.body.take().is_some() {
            self.pending.push_back(StreamEvent::Done {
                trailing_keep_alives: self.decoder.trailing_keep_alives(),
            });
        }
    }
}

fn event_stream(body: ByteStream, cancel: CancellationToken) -> CompletionStream {
    let reader = EventReader {
        body: Some(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        cancel,
    };
    stream::unfold(reader, |mut reader| async move {
        let event = reader.next_event().await?;
        Some((event, reader))
    })
    .boxed()
}
