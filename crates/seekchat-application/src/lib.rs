//! Application layer for SeekChat.
//!
//! Coordinates the message graph, the streaming client and the stores:
//!
//! - [`ConversationManager`]: one conversation, its view state and streams
//! - [`ChatCollection`]: the conversation list, selection, export and import
//! - [`ChatServices`]: collaborators shared by both

pub mod collection;
pub mod conversation_manager;
pub mod services;

#[cfg(test)]
mod test_support;

pub use collection::ChatCollection;
pub use conversation_manager::{ConversationManager, NEW_CHAT_LABEL};
pub use services::ChatServices;
