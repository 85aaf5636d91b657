//! File-backed conversation and preference stores.
//!
//! Layout under the storage root:
//!
//! ```text
//! {root}/
//! ├── preferences.json           # API key, last selected conversation
//! └── DeepSeek{fileKey}/         # one namespace per document identity
//!     ├── Chats/
//!     │   └── {key}.json         # ConversationRecord snapshots
//!     └── DeleteChats.json       # tombstones: {"{chat}_{msg}": 1}
//! ```
//!
//! Preferences are shared by every identity; conversations and tombstones
//! are not.

use async_trait::async_trait;
use seekchat_core::{
    conversation::ConversationRecord,
    error::{ChatError, Result},
    keys::{ConversationKey, MessageKey},
    repository::{ConversationStore, PreferenceStore, tombstone_key},
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task;

use crate::storage::AtomicJsonFile;

const CHATS_DIR: &str = "Chats";
const TOMBSTONE_FILE: &str = "DeleteChats.json";
const PREFERENCES_FILE: &str = "preferences.json";

type Tombstones = BTreeMap<String, u8>;
type Preferences = BTreeMap<String, String>;

/// Directory name of the namespace for a document identity.
pub fn namespace_dir(file_key: &str) -> String {
    format!("DeepSeek{file_key}")
}

fn join_error(e: task::JoinError) -> ChatError {
    ChatError::io(format!("Failed to spawn blocking task: {}", e))
}

/// Conversation store keeping one JSON file per conversation.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    namespace: PathBuf,
}

impl JsonDirStore {
    /// Creates a store for the namespace of `file_key` under `root_dir`.
    ///
    /// # Arguments
    ///
    /// * `root_dir` - Storage root (typically `~/.local/share/seekchat`)
    /// * `file_key` - Identity token of the host document, possibly empty
    pub fn new(root_dir: impl AsRef<Path>, file_key: &str) -> Self {
        Self {
            namespace: root_dir.as_ref().join(namespace_dir(file_key)),
        }
    }

    pub fn namespace(&self) -> &Path {
        &self.namespace
    }

    fn chats_dir(&self) -> PathBuf {
        self.namespace.join(CHATS_DIR)
    }

    fn record_file(&self, key: ConversationKey) -> AtomicJsonFile<ConversationRecord> {
        AtomicJsonFile::new(self.chats_dir().join(format!("{key}.json")))
    }

    fn tombstone_file(&self) -> AtomicJsonFile<Tombstones> {
        AtomicJsonFile::new(self.namespace.join(TOMBSTONE_FILE))
    }

    fn list_keys_sync(dir: &Path) -> Result<Vec<ConversationKey>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<ConversationKey>().ok())
            {
                Some(key) => keys.push(key),
                None => tracing::debug!("Ignoring unexpected file in chat store: {}", path.display()),
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }
}

#[async_trait]
impl ConversationStore for JsonDirStore {
    async fn keys(&self) -> Result<Vec<ConversationKey>> {
        let dir = self.chats_dir();
        task::spawn_blocking(move || Self::list_keys_sync(&dir))
            .await
            .map_err(join_error)?
    }

    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationRecord>> {
        let file = self.record_file(key);
        task::spawn_blocking(move || file.load().map_err(ChatError::from))
            .await
            .map_err(join_error)?
    }

    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        let file = self.record_file(record.key);
        let record = record.clone();
        task::spawn_blocking(move || file.save(&record).map_err(ChatError::from))
            .await
            .map_err(join_error)?
    }

    async fn remove(&self, key: ConversationKey) -> Result<()> {
        let file = self.record_file(key);
        task::spawn_blocking(move || file.remove().map_err(ChatError::from))
            .await
            .map_err(join_error)?
    }

    async fn mark_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<()> {
        let file = self.tombstone_file();
        let key = tombstone_key(conversation, message);
        task::spawn_blocking(move || {
            file.update(Tombstones::new(), |tombstones| {
                tombstones.insert(key, 1);
            })
            .map_err(ChatError::from)
        })
        .await
        .map_err(join_error)?
    }

    async fn is_deleted(
        &self,
        conversation: ConversationKey,
        message: Option<MessageKey>,
    ) -> Result<bool> {
        let file = self.tombstone_file();
        let key = tombstone_key(conversation, message);
        task::spawn_blocking(move || -> Result<bool> {
            let tombstones = file.load()?.unwrap_or_default();
            Ok(tombstones.get(&key).is_some_and(|value| *value != 0))
        })
        .await
        .map_err(join_error)?
    }
}

/// Preference store shared across document identities.
#[derive(Debug, Clone)]
pub struct JsonPreferenceStore {
    path: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            path: root_dir.as_ref().join(PREFERENCES_FILE),
        }
    }

    fn file(&self) -> AtomicJsonFile<Preferences> {
        AtomicJsonFile::new(self.path.clone())
    }
}

#[async_trait]
impl PreferenceStore for JsonPreferenceStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let file = self.file();
        let name = name.to_string();
        task::spawn_blocking(move || -> Result<Option<String>> {
            let mut preferences = file.load()?.unwrap_or_default();
            Ok(preferences.remove(&name))
        })
        .await
        .map_err(join_error)?
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        let file = self.file();
        let (name, value) = (name.to_string(), value.to_string());
        task::spawn_blocking(move || {
            file.update(Preferences::new(), |preferences| {
                preferences.insert(name, value);
            })
            .map_err(ChatError::from)
        })
        .await
        .map_err(join_error)?
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let file = self.file();
        let name = name.to_string();
        task::spawn_blocking(move || {
            file.update(Preferences::new(), |preferences| {
                preferences.remove(&name);
            })
            .map_err(ChatError::from)
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekchat_core::conversation::{Message, Role};
    use seekchat_core::repository::{API_KEY_PREFERENCE, LAST_CHAT_PREFERENCE};
    use tempfile::TempDir;

    fn record(key: ConversationKey) -> ConversationRecord {
        let mut record = ConversationRecord::new(key, "chat");
        record.first_key = Some(key + 1);
        record
            .messages
            .insert(key + 1, Message::new(key + 1, key + 2, Role::User, "hello"));
        record
    }

    #[tokio::test]
    async fn test_save_load_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(temp_dir.path(), "");

        store.save(&record(200)).await.unwrap();
        store.save(&record(100)).await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec![100, 200]);
        assert_eq!(store.load(100).await.unwrap(), Some(record(100)));
        assert!(store.load(300).await.unwrap().is_none());
        assert!(temp_dir.path().join("DeepSeek/Chats/100.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_of_one_conversation() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(temp_dir.path(), "");

        // Snapshots of different lengths, as autosave and streaming produce.
        let saves: Vec<_> = (0..16)
            .map(|n| {
                let store = store.clone();
                let mut snapshot = record(1);
                snapshot.messages.get_mut(&2).unwrap().content = "x".repeat(n * 512);
                tokio::spawn(async move { store.save(&snapshot).await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let stored = store.load(1).await.unwrap().unwrap();
        assert!(stored.messages[&2].content.chars().all(|c| c == 'x'));
        assert_eq!(store.keys().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_remove_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(temp_dir.path(), "abc");
        store.save(&record(1)).await.unwrap();
        store.remove(1).await.unwrap();
        store.remove(1).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let first = JsonDirStore::new(temp_dir.path(), "");
        let second = JsonDirStore::new(temp_dir.path(), "42");

        first.save(&record(1)).await.unwrap();
        first.mark_deleted(5, None).await.unwrap();

        assert!(second.keys().await.unwrap().is_empty());
        assert!(!second.is_deleted(5, None).await.unwrap());
        assert_eq!(second.namespace(), temp_dir.path().join("DeepSeek42"));
    }

    #[tokio::test]
    async fn test_tombstones() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(temp_dir.path(), "");

        assert!(!store.is_deleted(10, Some(11)).await.unwrap());
        store.mark_deleted(10, Some(11)).await.unwrap();
        store.mark_deleted(12, None).await.unwrap();

        assert!(store.is_deleted(10, Some(11)).await.unwrap());
        assert!(!store.is_deleted(10, None).await.unwrap());
        assert!(store.is_deleted(12, None).await.unwrap());

        let raw = fs::read_to_string(temp_dir.path().join("DeepSeek/DeleteChats.json")).unwrap();
        assert!(raw.contains("\"10_11\":1"));
        assert!(raw.contains("\"12_\":1"));
    }

    #[tokio::test]
    async fn test_unexpected_files_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(temp_dir.path(), "");
        store.save(&record(7)).await.unwrap();
        fs::write(temp_dir.path().join("DeepSeek/Chats/notes.json"), "{}").unwrap();
        fs::write(temp_dir.path().join("DeepSeek/Chats/8.txt"), "").unwrap();
        assert_eq!(store.keys().await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = JsonPreferenceStore::new(temp_dir.path());

        assert!(prefs.get(API_KEY_PREFERENCE).await.unwrap().is_none());
        prefs.set(API_KEY_PREFERENCE, "sk-1").await.unwrap();
        prefs.set(LAST_CHAT_PREFERENCE, "42").await.unwrap();
        assert_eq!(prefs.get(API_KEY_PREFERENCE).await.unwrap().as_deref(), Some("sk-1"));

        prefs.remove(LAST_CHAT_PREFERENCE).await.unwrap();
        assert!(prefs.get(LAST_CHAT_PREFERENCE).await.unwrap().is_none());
        assert_eq!(prefs.get(API_KEY_PREFERENCE).await.unwrap().as_deref(), Some("sk-1"));
    }
}
