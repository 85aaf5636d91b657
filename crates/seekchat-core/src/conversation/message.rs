//! Conversation message types.
//!
//! Field names on the wire (`groupKey`, `nextKey`, `reasoning_content`) match
//! the document export format, so snapshots written by older clients load
//! unchanged.

use serde::{Deserialize, Serialize};

use crate::keys::MessageKey;

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user.
    User,
    /// Message from the AI assistant.
    Assistant,
    /// System prompt.
    System,
}

/// A single node of the message graph.
///
/// `next_key` points at the successor on the *active* path only; alternates
/// for the same turn share `group_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub key: MessageKey,
    #[serde(default)]
    pub group_key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_key: Option<MessageKey>,
    /// Favorite flag. Persisted, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<bool>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "reasoning_content", default)]
    pub reasoning_content: String,
}

impl Message {
    pub fn new(key: MessageKey, group_key: MessageKey, role: Role, content: impl Into<String>) -> Self {
        Self {
            key,
            group_key,
            next_key: None,
            mark: None,
            role,
            content: content.into(),
            reasoning_content: String::new(),
        }
    }

    /// Empty assistant message to be filled by a stream.
    pub fn placeholder(key: MessageKey, group_key: MessageKey) -> Self {
        Self::new(key, group_key, Role::Assistant, String::new())
    }

    /// True when neither channel has received any text.
    pub fn is_blank(&self) -> bool {
        self.content.is_empty() && self.reasoning_content.is_empty()
    }

    /// True for an assistant message that never received any text.
    pub fn is_empty_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.is_blank()
    }

    pub fn is_marked(&self) -> bool {
        self.mark.unwrap_or(false)
    }
}
