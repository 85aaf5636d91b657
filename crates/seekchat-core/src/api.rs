//! Chat-completion API types and client traits.
//!
//! The wire types mirror the DeepSeek (OpenAI-compatible) chat-completion
//! schema. The traits are the seam between conversation management and the
//! HTTP client, so managers can be driven by scripted clients in tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::conversation::Role;
use crate::error::Result;

/// A role/content pair sent as request context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Request body for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            repetition_penalty: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: Option<f32>) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    /// Copy of this request with the `stream` flag forced.
    pub fn streaming(&self, stream: bool) -> Self {
        Self {
            stream,
            ..self.clone()
        }
    }
}

/// Incremental (or, for non-streaming calls, complete) message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// One entry of a response's `choices` array.
///
/// Streaming chunks carry `delta`; complete responses carry `message`, which
/// is accepted under the same field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChoice {
    #[serde(default, alias = "message")]
    pub delta: Delta,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Response body (complete or one streamed chunk).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
}

/// Item of a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoded response fragment.
    Fragment(ResponseChoice),
    /// Always the last item. Carries the number of consecutive keep-alive
    /// events seen immediately before the stream ended.
    Done { trailing_keep_alives: u32 },
}

/// Lazy, forward-only sequence of stream events.
pub type CompletionStream = BoxStream<'static, StreamEvent>;

/// A chat-completion client bound to one API key.
#[async_trait]
pub trait ChatCompletionApi: Send + Sync {
    /// Issues a non-streaming request and returns its first choice.
    async fn create_chat_completion(&self, request: &ChatRequest) -> Result<ResponseChoice>;

    /// Opens a streaming request.
    ///
    /// Fails only if the request cannot be sent or the status is not a
    /// success; read errors after that end the stream instead. Cancelling
    /// `cancel` stops the read loop and releases the connection.
    async fn create_streaming_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream>;
}

/// Builds clients from a user API key.
pub trait ChatClientFactory: Send + Sync {
    fn create(&self, api_key: &str) -> Result<Arc<dyn ChatCompletionApi>>;
}
