//! Conversation domain: messages, the branching graph and view state.

pub mod event;
pub mod expand;
pub mod graph;
pub mod message;
pub mod record;

pub use event::ConversationEvent;
pub use expand::{Channel, ExpandState};
pub use graph::{MessageGraph, Regeneration, Removal};
pub use message::{Message, Role};
pub use record::ConversationRecord;
