//! Network interaction layer: the DeepSeek chat-completion client and the
//! event-stream decoder it is built on.

pub mod deepseek_client;
pub mod sse;

pub use deepseek_client::{DeepSeekClient, DeepSeekClientFactory};
pub use sse::{SseDecoder, SseEvent};
