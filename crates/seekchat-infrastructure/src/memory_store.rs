//! In-memory store for tests and ephemeral sessions.

use async_trait::async_trait;
use seekchat_core::{
    conversation::ConversationRecord,
    error::Result,
    keys::{ConversationKey, MessageKey},
    repository::{ConversationStore, PreferenceStore, tombstone_key},
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// Implements both [`ConversationStore`] and [`PreferenceStore`] in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<ConversationKey, ConversationRecord>>,
    tombstones: RwLock<HashSet<String>>,
    preferences: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = ConversationRecord>) -> Self {
        let records = records.into_iter().map(|r| (r.key, r)).collect();
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn keys(&self) -> Result<Vec<ConversationKey>> {
        Ok(self.records.read().await.keys().copied().collect())
    }

    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationRecord>> {
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        self.records.write().await.insert(record.key, record.clone());
        Ok(())
    }

    async fn remove(&self, key: ConversationKey) -> Result<()> {
        self.records.write().await.remove(&key);
        Ok(())
    }

    async fn mark_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<()> {
        self.tombstones
            .write()
            .await
            .insert(tombstone_key(conversation, message));
        Ok(())
    }

    async fn is_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<bool> {
        Ok(self
            .tombstones
            .read()
            .await
            .contains(&tombstone_key(conversation, message)))
    }
}

#[async_trait]
impl PreferenceStore for InMemoryStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.preferences.read().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.preferences
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.preferences.write().await.remove(name);
        Ok(())
    }
}
