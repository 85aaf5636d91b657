//! Manager for a single conversation.
//!
//! `ConversationManager` owns the message graph of one conversation together
//! with its settings, expand/collapse view state and the registry of
//! assistant messages currently being filled by a stream. All of that lives
//! behind one `RwLock`, which is never held across a network or storage
//! await.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use seekchat_core::api::{ChatCompletionApi, ChatMessage, ChatRequest, Delta, StreamEvent};
use seekchat_core::conversation::{
    Channel, ConversationEvent, ConversationRecord, ExpandState, Message, MessageGraph, Role,
};
use seekchat_core::error::{ChatError, Result};
use seekchat_core::keys::{ConversationKey, MessageKey, next_key, observe_key};
use seekchat_core::repository::API_KEY_PREFERENCE;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::ChatServices;

const EVENT_CAPACITY: usize = 256;

/// Label given to conversations before their first message.
pub const NEW_CHAT_LABEL: &str = "New chat";

/// In-flight stream for one assistant message.
#[derive(Debug)]
struct LoadingEntry {
    cancel: CancellationToken,
    retry_count: u32,
}

#[derive(Debug)]
struct ConversationState {
    label: String,
    graph: MessageGraph,
    input_text: String,
    temperature: f32,
    open_reasoning: bool,
    is_new: bool,
    is_local: bool,
    /// Set once the conversation is removed from its collection.
    closed: bool,
    expand: ExpandState,
    loading: HashMap<MessageKey, LoadingEntry>,
}

/// Tracks which channels of the streamed message already received text.
#[derive(Default)]
struct SeenChannels {
    content: bool,
    reasoning: bool,
}

pub struct ConversationManager {
    key: ConversationKey,
    state: RwLock<ConversationState>,
    /// Held for the whole of a snapshot write; `close` takes it too.
    save_lock: Mutex<()>,
    services: Arc<ChatServices>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationManager {
    /// Creates an empty conversation.
    pub fn new(
        key: ConversationKey,
        label: impl Into<String>,
        open_reasoning: bool,
        services: Arc<ChatServices>,
    ) -> Arc<Self> {
        let mut record = ConversationRecord::new(key, label);
        record.open_reasoning = open_reasoning;
        Self::from_record(record, services)
    }

    /// Restores a conversation from its persisted snapshot.
    pub fn from_record(record: ConversationRecord, services: Arc<ChatServices>) -> Arc<Self> {
        observe_key(record.max_key());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = ConversationState {
            label: record.label,
            graph: MessageGraph::new(record.first_key, record.messages),
            input_text: record.input_text,
            temperature: record.temperature,
            open_reasoning: record.open_reasoning,
            is_new: false,
            is_local: false,
            closed: false,
            expand: ExpandState::default(),
            loading: HashMap::new(),
        };
        Arc::new(Self {
            key: record.key,
            state: RwLock::new(state),
            save_lock: Mutex::new(()),
            services,
            events,
        })
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    /// Subscribes to change and scroll notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn changed(&self) {
        self.emit(ConversationEvent::Changed {
            conversation: self.key,
        });
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    pub async fn label(&self) -> String {
        self.state.read().await.label.clone()
    }

    pub async fn input_text(&self) -> String {
        self.state.read().await.input_text.clone()
    }

    pub async fn temperature(&self) -> f32 {
        self.state.read().await.temperature
    }

    pub async fn open_reasoning(&self) -> bool {
        self.state.read().await.open_reasoning
    }

    pub async fn is_new(&self) -> bool {
        self.state.read().await.is_new
    }

    pub async fn set_is_new(&self, is_new: bool) {
        self.state.write().await.is_new = is_new;
    }

    pub async fn is_local(&self) -> bool {
        self.state.read().await.is_local
    }

    pub async fn set_is_local(&self, is_local: bool) {
        self.state.write().await.is_local = is_local;
    }

    pub async fn first_key(&self) -> Option<MessageKey> {
        self.state.read().await.graph.first_key()
    }

    pub async fn message(&self, key: MessageKey) -> Option<Message> {
        self.state.read().await.graph.get(key).cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.graph.len()
    }

    /// Messages of the active path, in order.
    pub async fn active_path(&self) -> Vec<Message> {
        let state = self.state.read().await;
        state.graph.active_messages().into_iter().cloned().collect()
    }

    /// Alternates of `key`'s turn (including `key`), newest first.
    pub async fn group_siblings(&self, key: MessageKey) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .graph
            .siblings(key)
            .into_iter()
            .filter_map(|k| state.graph.get(k).cloned())
            .collect()
    }

    pub async fn root_messages(&self) -> Vec<MessageKey> {
        self.state.read().await.graph.root_messages()
    }

    pub async fn loading_keys(&self) -> Vec<MessageKey> {
        let mut keys: Vec<_> = self.state.read().await.loading.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub async fn is_loading(&self, key: MessageKey) -> bool {
        self.state.read().await.loading.contains_key(&key)
    }

    pub async fn retry_count(&self, key: MessageKey) -> Option<u32> {
        self.state
            .read()
            .await
            .loading
            .get(&key)
            .map(|entry| entry.retry_count)
    }

    pub async fn is_expanded(&self, key: MessageKey, channel: Channel) -> bool {
        self.state.read().await.expand.is_expanded(key, channel)
    }

    /// Snapshot for persistence and export.
    pub async fn to_record(&self) -> ConversationRecord {
        let state = self.state.read().await;
        ConversationRecord {
            key: self.key,
            label: state.label.clone(),
            first_key: state.graph.first_key(),
            messages: state.graph.messages().clone(),
            input_text: state.input_text.clone(),
            open_reasoning: state.open_reasoning,
            temperature: state.temperature,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Writes the current snapshot. Failures are logged, never returned.
    pub async fn save_chat(&self) {
        let _saving = self.save_lock.lock().await;
        if self.state.read().await.closed {
            return;
        }
        let record = self.to_record().await;
        if let Err(e) = self.services.store.save(&record).await {
            tracing::warn!("Failed to save conversation {}: {}", self.key, e);
        }
    }

    async fn tombstone(&self, keys: &[MessageKey]) {
        for key in keys {
            if let Err(e) = self.services.store.mark_deleted(self.key, Some(*key)).await {
                tracing::warn!(
                    "Failed to tombstone message {} of conversation {}: {}",
                    key,
                    self.key,
                    e
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub async fn set_input_text(&self, text: impl Into<String>) {
        self.state.write().await.input_text = text.into();
        self.save_chat().await;
    }

    pub async fn set_temperature(&self, temperature: f32) {
        self.state.write().await.temperature = temperature;
        self.save_chat().await;
        self.changed();
    }

    pub async fn set_open_reasoning(&self, open_reasoning: bool) {
        self.state.write().await.open_reasoning = open_reasoning;
        self.save_chat().await;
        self.changed();
    }

    pub async fn set_label(&self, label: impl Into<String>) {
        self.state.write().await.label = label.into();
        self.save_chat().await;
        self.changed();
    }

    /// Flips the favorite flag of `key`. Returns the new value.
    pub async fn toggle_mark(&self, key: MessageKey) -> Option<bool> {
        let marked = {
            let mut state = self.state.write().await;
            let message = state.graph.get_mut(key)?;
            let marked = !message.is_marked();
            message.mark = Some(marked);
            marked
        };
        self.save_chat().await;
        self.changed();
        Some(marked)
    }

    // ------------------------------------------------------------------
    // View state
    // ------------------------------------------------------------------

    /// Sets or toggles the content pane of `key`; returns the new state.
    pub async fn expand(&self, key: MessageKey, expanded: Option<bool>) -> bool {
        let expanded = self.state.write().await.expand.expand(key, expanded);
        self.changed();
        expanded
    }

    /// Expands every non-system message of the active path, or collapses all.
    pub async fn expand_all(&self, expanded: bool) {
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if expanded {
                state.expand.expand_path(state.graph.active_messages());
            } else {
                state.expand.collapse_all();
            }
        }
        self.changed();
    }

    // ------------------------------------------------------------------
    // Graph operations
    // ------------------------------------------------------------------

    fn add_locked(state: &mut ConversationState, index: Option<usize>) -> MessageKey {
        let key = next_key();
        let group_key = next_key();
        let content = std::mem::take(&mut state.input_text);
        if state
            .graph
            .insert_user(Message::new(key, group_key, Role::User, content.clone()), index)
        {
            state.label = content;
        }
        state.expand.set(key, Channel::Content, true);
        state.is_local = false;
        key
    }

    fn remove_locked(
        state: &mut ConversationState,
        key: MessageKey,
        is_slice: bool,
    ) -> Option<MessageKey> {
        let removal = state.graph.remove(key, is_slice)?;
        if let Some(fallback) = removal.fallback {
            state.expand.expand(fallback, Some(true));
        }
        state.expand.forget(key);
        state.is_local = false;
        Some(removal.removed.key)
    }

    /// Appends a user message carrying the current input text, or splices it
    /// before the active-path entry at `index`.
    pub async fn add(&self, index: Option<usize>) -> MessageKey {
        let key = {
            let mut state = self.state.write().await;
            Self::add_locked(&mut state, index)
        };
        self.save_chat().await;
        if index.is_none() {
            self.emit(ConversationEvent::ScrollToBottom {
                conversation: self.key,
                follow: false,
            });
        }
        self.changed();
        key
    }

    /// Removes an active-path message and tombstones it.
    ///
    /// Returns `false` when `key` is not on the active path.
    pub async fn remove(&self, key: MessageKey, is_slice: bool) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            Self::remove_locked(&mut state, key, is_slice)
        };
        let Some(removed) = removed else {
            return false;
        };
        self.tombstone(&[removed]).await;
        self.save_chat().await;
        self.changed();
        true
    }

    /// Sends the current input.
    ///
    /// The input is trimmed; an empty assistant placeholder left at the tail
    /// by an earlier attempt is dropped; a non-empty input becomes a new user
    /// message. An answer is then fetched in a spawned task unless the active
    /// path is empty.
    pub async fn send(self: &Arc<Self>) -> Option<JoinHandle<Result<()>>> {
        let (removed, path_empty) = {
            let mut state = self.state.write().await;
            state.input_text = state.input_text.trim().to_string();

            let tail = state
                .graph
                .active_messages()
                .last()
                .filter(|m| m.is_empty_placeholder() && !state.loading.contains_key(&m.key))
                .map(|m| m.key);
            let removed = tail.and_then(|key| Self::remove_locked(&mut state, key, false));

            if !state.input_text.is_empty() {
                Self::add_locked(&mut state, None);
            }
            (removed, state.graph.active_path().is_empty())
        };

        if let Some(removed) = removed {
            self.tombstone(&[removed]).await;
        }
        self.save_chat().await;
        self.emit(ConversationEvent::ScrollToBottom {
            conversation: self.key,
            follow: false,
        });
        self.changed();

        if path_empty {
            return None;
        }
        let this = Arc::clone(self);
        let delay = self.services.config.settle_delay();
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fetch_answer(None, None).await
        }))
    }

    /// Regenerates the message at `key` as a new sibling in its group.
    pub async fn refresh(self: &Arc<Self>, key: MessageKey) -> Option<JoinHandle<Result<()>>> {
        let new_key = next_key();
        let (group_key, removed) = {
            let mut state = self.state.write().await;
            let regeneration = state.graph.prepare_regenerate(key, new_key)?;
            let removed = regeneration.removed.map(|removal| removal.removed.key);
            if let Some(removed) = removed {
                state.expand.forget(removed);
            }
            state.is_local = false;
            (regeneration.group_key, removed)
        };

        if let Some(removed) = removed {
            self.tombstone(&[removed]).await;
        }
        self.save_chat().await;
        self.changed();

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.fetch_answer(Some(new_key), Some(group_key)).await
        }))
    }

    /// Makes `target` the active alternate in place of `current`.
    pub async fn group_change(&self, current: MessageKey, target: MessageKey) -> bool {
        let switched = {
            let mut state = self.state.write().await;
            let switched = state.graph.group_change(current, target);
            if switched {
                state.expand.expand(target, Some(true));
            }
            switched
        };
        if switched {
            self.save_chat().await;
            self.changed();
        }
        switched
    }

    /// Rewires the graph so that `target` lies on the active path.
    pub async fn switch_to_message(&self, target: MessageKey) -> bool {
        let switched = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let switched = state.graph.switch_to(target);
            if switched {
                state.expand.collapse_all();
                state.expand.expand_path(state.graph.active_messages());
            }
            switched
        };
        if !switched {
            return false;
        }
        self.save_chat().await;
        self.changed();
        self.emit(ConversationEvent::ScrollToKey {
            conversation: self.key,
            key: target,
        });
        true
    }

    /// Edits an active-path message in place, or with `is_add` branches a
    /// new sibling holding `content`. Returns the key holding the new content.
    pub async fn save_message(
        &self,
        edit_key: MessageKey,
        content: impl Into<String>,
        is_add: bool,
    ) -> Option<MessageKey> {
        let edited = {
            let mut state = self.state.write().await;
            let branch = is_add.then(next_key);
            let edited = state.graph.edit(edit_key, content.into(), branch)?;
            state.is_local = false;
            edited
        };
        self.save_chat().await;
        self.changed();
        Some(edited)
    }

    /// Cancels the stream filling `key` and deletes the partial message.
    pub async fn stop(&self, key: MessageKey) -> bool {
        let entry = self.state.write().await.loading.remove(&key);
        let Some(entry) = entry else {
            return false;
        };
        entry.cancel.cancel();
        tracing::debug!(target: "seekchat::stream", "Stopped stream for message {}", key);
        self.remove(key, false).await;
        true
    }

    /// Deletes every message, tombstoning each, and stops all streams.
    pub async fn clear(&self) {
        let removed = {
            let mut state = self.state.write().await;
            for (_, entry) in state.loading.drain() {
                entry.cancel.cancel();
            }
            let removed = state.graph.clear();
            state.expand.collapse_all();
            state.is_local = false;
            removed
        };
        self.tombstone(&removed).await;
        self.save_chat().await;
        self.changed();
    }

    /// Cancels every stream and stops persisting this conversation.
    ///
    /// Returns only after a snapshot write already underway has landed, so
    /// the caller may delete the stored record without it reappearing.
    pub async fn close(&self) {
        let _saving = self.save_lock.lock().await;
        let mut state = self.state.write().await;
        state.closed = true;
        for (_, entry) in state.loading.drain() {
            entry.cancel.cancel();
        }
    }

    /// Merges an imported snapshot into the graph.
    ///
    /// Tombstoned messages are skipped. With `overwrite` the imported copy
    /// replaces local content; otherwise only missing messages are adopted.
    /// Returns whether any content differed. Does not persist.
    pub async fn merge_data(&self, record: &ConversationRecord, overwrite: bool) -> bool {
        let mut deleted = Vec::new();
        for key in record.messages.keys() {
            match self.services.store.is_deleted(self.key, Some(*key)).await {
                Ok(true) => deleted.push(*key),
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to read tombstone {}_{}: {}", self.key, key, e),
            }
        }
        observe_key(record.max_key());

        let changed = self
            .state
            .write()
            .await
            .graph
            .merge(&record.messages, overwrite, |key| deleted.contains(&key));
        self.changed();
        changed
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Returns the cached API key, asking the credential prompt if needed.
    async fn api_key(&self) -> Result<String> {
        let preferences = &self.services.preferences;
        match preferences.get(API_KEY_PREFERENCE).await {
            Ok(Some(key)) if !key.is_empty() => return Ok(key),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to read cached API key: {}", e),
        }

        let key = self.services.credentials.request_api_key().await?;
        if key.trim().is_empty() {
            return Err(ChatError::MissingApiKey("no API key was provided".into()));
        }
        if let Err(e) = preferences.set(API_KEY_PREFERENCE, &key).await {
            tracing::warn!("Failed to cache API key: {}", e);
        }
        Ok(key)
    }

    /// Streams an assistant answer for the active path into a new message.
    ///
    /// The placeholder is stored under `key` (fresh when `None`) in
    /// `group_key` (fresh when `None`). Only a missing API key is returned as
    /// an error; every other failure ends the turn, keeping whatever partial
    /// content was received.
    pub async fn fetch_answer(
        &self,
        key: Option<MessageKey>,
        group_key: Option<MessageKey>,
    ) -> Result<()> {
        let api_key = self.api_key().await?;
        let client = self.services.clients.create(&api_key)?;

        let key = key.unwrap_or_else(next_key);
        let cancel = CancellationToken::new();
        let request = {
            let mut state = self.state.write().await;
            let messages = state
                .graph
                .active_messages()
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect();

            state
                .graph
                .attach_placeholder(key, group_key.unwrap_or_else(next_key));
            state.loading.insert(
                key,
                LoadingEntry {
                    cancel: cancel.clone(),
                    retry_count: 0,
                },
            );
            state.is_local = false;

            let config = &self.services.config;
            ChatRequest::new(messages, config.model_for(state.open_reasoning))
                .with_max_tokens(config.max_tokens)
                .with_temperature(state.temperature)
                .with_top_p(config.top_p)
                .with_repetition_penalty(config.repetition_penalty)
        };

        self.save_chat().await;
        self.changed();
        self.emit(ConversationEvent::StreamStarted {
            conversation: self.key,
            key,
        });
        self.emit(ConversationEvent::ScrollToBottom {
            conversation: self.key,
            follow: false,
        });

        match self.stream_answer(key, client.as_ref(), &request, &cancel).await {
            Ok(()) => {
                tracing::debug!(target: "seekchat::stream", "Answer {} complete", key);
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(target: "seekchat::stream", "Request cancelled by user");
            }
            Err(e) => {
                tracing::error!(target: "seekchat::stream", "Request failed: {}", e);
            }
        }

        self.state.write().await.loading.remove(&key);
        self.emit(ConversationEvent::StreamFinished {
            conversation: self.key,
            key,
        });
        self.changed();
        Ok(())
    }

    async fn stream_answer(
        &self,
        key: MessageKey,
        client: &dyn ChatCompletionApi,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = &self.services.config;
        let mut seen = SeenChannels::default();

        'attempts: loop {
            if !self.is_loading(key).await {
                cancel.cancel();
                return Err(ChatError::Cancelled);
            }
            let mut stream = client
                .create_streaming_chat_completion(request, cancel.clone())
                .await?;

            while let Some(event) = stream.next().await {
                match event {
                    StreamEvent::Fragment(choice) => {
                        let Some(is_tail) = self.apply_delta(key, &choice.delta, &mut seen).await
                        else {
                            cancel.cancel();
                            return Err(ChatError::Cancelled);
                        };
                        self.save_chat().await;
                        self.changed();
                        if is_tail {
                            self.emit(ConversationEvent::ScrollToBottom {
                                conversation: self.key,
                                follow: true,
                            });
                        }
                    }
                    StreamEvent::Done {
                        trailing_keep_alives,
                    } => {
                        if cancel.is_cancelled() {
                            return Err(ChatError::Cancelled);
                        }
                        if !config.is_stalled(trailing_keep_alives) {
                            return Ok(());
                        }

                        let Some(attempt) = self.bump_retry(key).await else {
                            return Err(ChatError::Cancelled);
                        };
                        tracing::debug!(
                            target: "seekchat::stream",
                            "Stream stalled after {} keep-alives, retry {}",
                            trailing_keep_alives,
                            attempt
                        );
                        self.emit(ConversationEvent::StreamRetry {
                            conversation: self.key,
                            key,
                            attempt,
                        });
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                            _ = tokio::time::sleep(config.retry_backoff()) => {}
                        }
                        continue 'attempts;
                    }
                }
            }
            return Ok(());
        }
    }

    /// Appends a fragment to the loading message.
    ///
    /// Returns `None` when the message is no longer loading, otherwise whether
    /// it is the tail of the active path.
    async fn apply_delta(
        &self,
        key: MessageKey,
        delta: &Delta,
        seen: &mut SeenChannels,
    ) -> Option<bool> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if !state.loading.contains_key(&key) {
            return None;
        }
        let message = state.graph.get_mut(key)?;

        if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
            message.content.push_str(content);
            if !seen.content {
                seen.content = true;
                state.expand.set(key, Channel::Content, true);
            }
        }
        if let Some(reasoning) = delta.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            message.reasoning_content.push_str(reasoning);
            if !seen.reasoning {
                seen.reasoning = true;
                state.expand.set(key, Channel::Reasoning, true);
            }
        }
        state.is_local = false;
        Some(state.graph.active_path().last() == Some(&key))
    }

    async fn bump_retry(&self, key: MessageKey) -> Option<u32> {
        let mut state = self.state.write().await;
        let entry = state.loading.get_mut(&key)?;
        entry.retry_count += 1;
        Some(entry.retry_count)
    }
}

impl std::fmt::Debug for ConversationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationManager")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Copy of `record` with its messages dropped.
pub(crate) fn without_messages(record: &ConversationRecord) -> ConversationRecord {
    ConversationRecord {
        messages: BTreeMap::new(),
        ..record.clone()
    }
}
