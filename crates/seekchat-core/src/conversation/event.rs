use serde::Serialize;

use crate::keys::{ConversationKey, MessageKey};

/// Notifications published by a conversation for whoever renders it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// Graph, settings or expand state changed.
    Changed { conversation: ConversationKey },
    /// Scroll to the end; `follow` asks the view to keep following the stream.
    ScrollToBottom { conversation: ConversationKey, follow: bool },
    ScrollToKey { conversation: ConversationKey, key: MessageKey },
    StreamStarted { conversation: ConversationKey, key: MessageKey },
    /// A stalled stream is being retried.
    StreamRetry { conversation: ConversationKey, key: MessageKey, attempt: u32 },
    StreamFinished { conversation: ConversationKey, key: MessageKey },
}

impl ConversationEvent {
    pub fn conversation(&self) -> ConversationKey {
        match self {
            Self::Changed { conversation }
            | Self::ScrollToBottom { conversation, .. }
            | Self::ScrollToKey { conversation, .. }
            | Self::StreamStarted { conversation, .. }
            | Self::StreamRetry { conversation, .. }
            | Self::StreamFinished { conversation, .. } => *conversation,
        }
    }
}
