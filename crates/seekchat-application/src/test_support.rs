//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use seekchat_core::api::{
    ChatClientFactory, ChatCompletionApi, ChatRequest, CompletionStream, Delta, ResponseChoice,
    StreamEvent,
};
use seekchat_core::config::ClientConfig;
use seekchat_core::credential::CredentialPrompt;
use seekchat_core::conversation::ConversationRecord;
use seekchat_core::error::{ChatError, Result};
use seekchat_core::keys::{ConversationKey, MessageKey};
use seekchat_core::repository::ConversationStore;
use seekchat_infrastructure::InMemoryStore;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::services::ChatServices;

/// Behaviour of one streaming call.
pub(crate) enum Script {
    Events(Vec<StreamEvent>),
    /// Yields the events, then waits for cancellation before `Done`.
    HangAfter(Vec<StreamEvent>),
    Fail(ChatError),
}

#[derive(Default)]
pub(crate) struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatCompletionApi for ScriptedClient {
    async fn create_chat_completion(&self, request: &ChatRequest) -> Result<ResponseChoice> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ResponseChoice::default())
    }

    async fn create_streaming_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        self.requests.lock().unwrap().push(request.streaming(true));
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Script::HangAfter(events)) => Ok(stream::iter(events)
                .chain(stream::once(async move {
                    cancel.cancelled().await;
                    StreamEvent::Done {
                        trailing_keep_alives: 0,
                    }
                }))
                .boxed()),
            Some(Script::Fail(err)) => Err(err),
            None => Ok(stream::iter(vec![StreamEvent::Done {
                trailing_keep_alives: 0,
            }])
            .boxed()),
        }
    }
}

struct ScriptedFactory {
    client: Arc<ScriptedClient>,
}

impl ChatClientFactory for ScriptedFactory {
    fn create(&self, api_key: &str) -> Result<Arc<dyn ChatCompletionApi>> {
        if api_key.is_empty() {
            return Err(ChatError::MissingApiKey("empty API key".into()));
        }
        Ok(self.client.clone())
    }
}

pub(crate) struct FixedPrompt(pub Option<String>);

#[async_trait]
impl CredentialPrompt for FixedPrompt {
    async fn request_api_key(&self) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| ChatError::MissingApiKey("prompt dismissed".into()))
    }
}

pub(crate) struct Fixture {
    pub services: Arc<ChatServices>,
    pub store: Arc<InMemoryStore>,
    pub client: Arc<ScriptedClient>,
}

impl Fixture {
    /// Replaces the credential prompt with one the user dismisses.
    pub(crate) fn without_api_key(mut self) -> Self {
        let mut services = (*self.services).clone();
        services.credentials = Arc::new(FixedPrompt(None));
        self.services = Arc::new(services);
        self
    }
}

/// Services backed by an in-memory store, a prompt answering `sk-test` and a
/// client playing `scripts` in order. Delays are zero.
pub(crate) fn fixture(scripts: Vec<Script>) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let client = Arc::new(ScriptedClient::new(scripts));
    let config = ClientConfig {
        retry_backoff_ms: 0,
        send_settle_delay_ms: 0,
        ..ClientConfig::default()
    };
    let services = ChatServices::new(
        store.clone(),
        store.clone(),
        Arc::new(ScriptedFactory {
            client: client.clone(),
        }),
        Arc::new(FixedPrompt(Some("sk-test".into()))),
    )
    .with_config(config);
    Fixture {
        services: Arc::new(services),
        store,
        client,
    }
}

pub(crate) fn fragment(content: &str) -> StreamEvent {
    StreamEvent::Fragment(ResponseChoice {
        delta: Delta {
            content: Some(content.to_string()),
            reasoning_content: None,
        },
        ..ResponseChoice::default()
    })
}

pub(crate) fn reasoning_fragment(reasoning: &str) -> StreamEvent {
    StreamEvent::Fragment(ResponseChoice {
        delta: Delta {
            content: None,
            reasoning_content: Some(reasoning.to_string()),
        },
        ..ResponseChoice::default()
    })
}

/// Store whose `save` parks until released, so a write can be caught midway.
pub(crate) struct HeldStore {
    inner: Arc<InMemoryStore>,
    pub entered: Notify,
    pub release: Notify,
}

impl HeldStore {
    pub(crate) fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ConversationStore for HeldStore {
    async fn keys(&self) -> Result<Vec<ConversationKey>> {
        self.inner.keys().await
    }

    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationRecord>> {
        self.inner.load(key).await
    }

    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.save(record).await
    }

    async fn remove(&self, key: ConversationKey) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn mark_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<()> {
        self.inner.mark_deleted(conversation, message).await
    }

    async fn is_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<bool> {
        self.inner.is_deleted(conversation, message).await
    }
}
