//! Repository traits for conversation persistence.
//!
//! The persistent store has two isolated namespaces per export identity:
//! conversation snapshots and tombstones (deletion markers). Preferences
//! (cached API key, last selected conversation) are shared across
//! identities.

use async_trait::async_trait;

use crate::conversation::ConversationRecord;
use crate::error::Result;
use crate::keys::{ConversationKey, MessageKey};

/// Preference holding the cached API key.
pub const API_KEY_PREFERENCE: &str = "DeepSeekAPIKey";

/// Preference holding the key of the last selected conversation.
pub const LAST_CHAT_PREFERENCE: &str = "lastChatKey";

/// Builds the tombstone key `"{conversation}_{message or empty}"`.
pub fn tombstone_key(conversation: ConversationKey, message: Option<MessageKey>) -> String {
    match message {
        Some(message) => format!("{}_{}", conversation, message),
        None => format!("{}_", conversation),
    }
}

/// An abstract store for conversation snapshots and tombstones.
///
/// # Implementation Notes
///
/// - Writes are last-write-wins per key; no ordering is guaranteed between
///   concurrent saves of the same conversation.
/// - Tombstones are permanent.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Lists the keys of every stored conversation.
    async fn keys(&self) -> Result<Vec<ConversationKey>>;

    /// Loads a conversation snapshot.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: Snapshot found
    /// - `Ok(None)`: No snapshot under this key
    /// - `Err(_)`: Error occurred during retrieval
    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationRecord>>;

    /// Saves (replaces) a conversation snapshot.
    async fn save(&self, record: &ConversationRecord) -> Result<()>;

    /// Deletes a conversation snapshot (no-op when absent).
    async fn remove(&self, key: ConversationKey) -> Result<()>;

    /// Records a tombstone for a conversation (`message == None`) or for one
    /// of its messages.
    async fn mark_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<()>;

    /// Checks whether a tombstone exists.
    async fn is_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<bool>;
}

/// Small string key-value store for client preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>>;

    async fn set(&self, name: &str, value: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;
}
