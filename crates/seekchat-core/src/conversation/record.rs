//! Persisted conversation snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::message::Message;
use crate::keys::{ConversationKey, MessageKey};

fn default_temperature() -> f32 {
    1.0
}

/// The full persisted state of one conversation.
///
/// This is both the store value and the element type of the array embedded
/// in exported documents. Message order is not stored; it is rebuilt from
/// `first_key` and each message's `next_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub key: ConversationKey,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_key: Option<MessageKey>,
    #[serde(default)]
    pub messages: BTreeMap<MessageKey, Message>,
    #[serde(default)]
    pub input_text: String,
    #[serde(default)]
    pub open_reasoning: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ConversationRecord {
    pub fn new(key: ConversationKey, label: impl Into<String>) -> Self {
        Self {
            key,
            label: label.into(),
            first_key: None,
            messages: BTreeMap::new(),
            input_text: String::new(),
            open_reasoning: false,
            temperature: default_temperature(),
        }
    }

    /// Largest key mentioned by this record.
    pub fn max_key(&self) -> i64 {
        self.messages
            .keys()
            .copied()
            .max()
            .map_or(self.key, |k| k.max(self.key))
    }
}
