//! Collection of conversations belonging to one host document.
//!
//! `ChatCollection` loads every stored conversation, merges the payload
//! embedded in the host document, keeps the list ordered newest first and
//! remembers the selected conversation. It also renders export documents and
//! merges imported ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use seekchat_core::conversation::ConversationRecord;
use seekchat_core::error::{ChatError, Result};
use seekchat_core::keys::{ConversationKey, next_key};
use seekchat_core::repository::LAST_CHAT_PREFERENCE;
use seekchat_infrastructure::EmbeddedDocument;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::conversation_manager::{ConversationManager, NEW_CHAT_LABEL, without_messages};
use crate::services::ChatServices;

/// How an embedded or imported conversation entered the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeOutcome {
    Created,
    Merged { changed: bool },
}

pub struct ChatCollection {
    services: Arc<ChatServices>,
    /// Host document: source of the embedded payload and export template.
    document: EmbeddedDocument,
    chats: RwLock<Vec<Arc<ConversationManager>>>,
    current: RwLock<Option<ConversationKey>>,
}

impl ChatCollection {
    /// Creates an empty collection. Call [`ChatCollection::init`] to load it.
    ///
    /// # Arguments
    ///
    /// * `services` - Stores, client factory and configuration
    /// * `document` - Host document whose payload is merged on init and which
    ///   serves as template for exports
    pub fn new(services: Arc<ChatServices>, document: EmbeddedDocument) -> Self {
        Self {
            services,
            document,
            chats: RwLock::new(Vec::new()),
            current: RwLock::new(None),
        }
    }

    pub fn document(&self) -> &EmbeddedDocument {
        &self.document
    }

    /// Loads stored conversations and merges the host document's payload.
    ///
    /// Unreadable records and an undecodable payload are logged and skipped.
    /// A stored record whose conversation carries a tombstone is dropped from
    /// disk instead of loaded. An empty collection gets one fresh conversation; otherwise the
    /// remembered selection is restored, falling back to the newest
    /// conversation.
    pub async fn init(&self) -> Result<()> {
        let keys = self.services.store.keys().await?;
        let mut loaded = Vec::with_capacity(keys.len());
        for key in keys {
            if self.is_chat_deleted(key).await {
                tracing::debug!("Discarding stored copy of deleted conversation {}", key);
                if let Err(e) = self.services.store.remove(key).await {
                    tracing::warn!("Failed to discard deleted conversation {}: {}", key, e);
                }
                continue;
            }
            match self.services.store.load(key).await {
                Ok(Some(record)) => {
                    loaded.push(ConversationManager::from_record(record, self.services.clone()))
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to read conversation {}: {}", key, e),
            }
        }
        tracing::debug!("Loaded {} stored conversations", loaded.len());
        *self.chats.write().await = loaded;

        match self.document.records() {
            Ok(records) => {
                for record in records {
                    if self.is_chat_deleted(record.key).await {
                        continue;
                    }
                    let (chat, _) = self.merge_record(&record, false).await;
                    chat.save_chat().await;
                    chat.set_is_local(true).await;
                }
            }
            Err(e) => tracing::warn!("Ignoring embedded conversations: {}", e),
        }

        if self.chats.read().await.is_empty() {
            self.add_chat().await;
            return Ok(());
        }

        self.sort_chats().await;
        let remembered = match self.services.preferences.get(LAST_CHAT_PREFERENCE).await {
            Ok(value) => value.and_then(|v| v.parse::<ConversationKey>().ok()),
            Err(e) => {
                tracing::warn!("Failed to read last selected conversation: {}", e);
                None
            }
        };
        let selected = match remembered {
            Some(key) if self.get(key).await.is_some() => Some(key),
            _ => self.chats.read().await.first().map(|chat| chat.key()),
        };
        self.select(selected).await;
        Ok(())
    }

    async fn is_chat_deleted(&self, key: ConversationKey) -> bool {
        self.services
            .store
            .is_deleted(key, None)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read tombstone for conversation {}: {}", key, e);
                false
            })
    }

    /// Merges `record` into an existing conversation or appends a new one.
    async fn merge_record(
        &self,
        record: &ConversationRecord,
        overwrite: bool,
    ) -> (Arc<ConversationManager>, MergeOutcome) {
        if let Some(chat) = self.get(record.key).await {
            let changed = chat.merge_data(record, overwrite).await;
            return (chat, MergeOutcome::Merged { changed });
        }

        let chat = ConversationManager::from_record(without_messages(record), self.services.clone());
        chat.merge_data(record, true).await;
        self.chats.write().await.push(chat.clone());
        (chat, MergeOutcome::Created)
    }

    /// Creates an empty conversation at the head of the list and selects it.
    pub async fn add_chat(&self) -> Arc<ConversationManager> {
        let chat = ConversationManager::new(next_key(), NEW_CHAT_LABEL, true, self.services.clone());
        chat.save_chat().await;
        self.chats.write().await.insert(0, chat.clone());
        self.select(Some(chat.key())).await;
        tracing::info!("Created conversation {}", chat.key());
        chat
    }

    /// Removes a conversation, its stored record and tombstones it.
    ///
    /// When the removed conversation was selected, the selection moves to its
    /// previous neighbour, else to the first remaining one, else to none.
    pub async fn remove_chat(&self, key: ConversationKey) -> bool {
        let (chat, replacement) = {
            let mut chats = self.chats.write().await;
            let Some(index) = chats.iter().position(|chat| chat.key() == key) else {
                return false;
            };
            let chat = chats.remove(index);
            let replacement = index
                .checked_sub(1)
                .and_then(|i| chats.get(i))
                .or_else(|| chats.first())
                .map(|chat| chat.key());
            (chat, replacement)
        };
        chat.close().await;

        if *self.current.read().await == Some(key) {
            self.select(replacement).await;
        }
        if let Err(e) = self.services.store.remove(key).await {
            tracing::warn!("Failed to delete stored conversation {}: {}", key, e);
        }
        if let Err(e) = self.services.store.mark_deleted(key, None).await {
            tracing::warn!("Failed to tombstone conversation {}: {}", key, e);
        }
        tracing::info!("Removed conversation {}", key);
        true
    }

    /// Selects `key` (or nothing) and remembers the choice.
    ///
    /// Returns `false` when `key` is not in the collection.
    pub async fn select(&self, key: Option<ConversationKey>) -> bool {
        if let Some(key) = key {
            if self.get(key).await.is_none() {
                return false;
            }
        }
        *self.current.write().await = key;

        let preferences = &self.services.preferences;
        let result = match key {
            Some(key) => preferences.set(LAST_CHAT_PREFERENCE, &key.to_string()).await,
            None => preferences.remove(LAST_CHAT_PREFERENCE).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to remember selected conversation: {}", e);
        }
        true
    }

    pub async fn current_key(&self) -> Option<ConversationKey> {
        *self.current.read().await
    }

    pub async fn current(&self) -> Option<Arc<ConversationManager>> {
        let key = self.current_key().await?;
        self.get(key).await
    }

    pub async fn get(&self, key: ConversationKey) -> Option<Arc<ConversationManager>> {
        self.chats
            .read()
            .await
            .iter()
            .find(|chat| chat.key() == key)
            .cloned()
    }

    /// Conversations in display order.
    pub async fn chats(&self) -> Vec<Arc<ConversationManager>> {
        self.chats.read().await.clone()
    }

    /// Orders the list newest first.
    pub async fn sort_chats(&self) {
        self.chats
            .write()
            .await
            .sort_by(|a, b| b.key().cmp(&a.key()));
    }

    /// Renders an export document holding the stored snapshots of `keys`.
    ///
    /// Keys without a stored snapshot are skipped. With `isolate` the copy
    /// gets a fresh identity, so opening it uses its own storage namespace.
    pub async fn render_export(&self, keys: &[ConversationKey], isolate: bool) -> Result<String> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.services.store.load(*key).await? {
                records.push(record);
            }
        }

        let mut document = self.document.with_records(&records)?;
        if isolate {
            document = document.with_file_key(&Uuid::new_v4().to_string());
        }
        Ok(document.into_text())
    }

    /// Writes [`ChatCollection::render_export`] output to `{file_name}.html`.
    ///
    /// # Returns
    ///
    /// The path of the written file.
    pub async fn export_html(
        &self,
        keys: &[ConversationKey],
        file_name: impl AsRef<Path>,
        isolate: bool,
    ) -> Result<PathBuf> {
        let text = self.render_export(keys, isolate).await?;
        let mut path = file_name.as_ref().as_os_str().to_owned();
        path.push(".html");
        let path = PathBuf::from(path);
        tokio::fs::write(&path, text).await?;
        tracing::info!("Exported {} conversations to {}", keys.len(), path.display());
        Ok(path)
    }

    /// Merges every conversation embedded in `text`, overwriting local copies.
    ///
    /// Conversations whose content changed, and new ones, are flagged new.
    /// Returns the number of conversations imported.
    pub async fn import_document(&self, text: &str) -> Result<usize> {
        let records = EmbeddedDocument::new(text).records()?;
        for record in &records {
            let (chat, outcome) = self.merge_record(record, true).await;
            let is_new = match outcome {
                MergeOutcome::Created => true,
                MergeOutcome::Merged { changed } => changed,
            };
            chat.set_is_new(is_new).await;
            chat.save_chat().await;
        }
        self.sort_chats().await;
        tracing::info!("Imported {} conversations", records.len());
        Ok(records.len())
    }

    /// Reads a document from `path` and imports it.
    pub async fn import_html(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ChatError::io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.import_document(&text).await
    }
}
