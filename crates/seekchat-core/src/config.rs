//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_REASONER_MODEL: &str = "deepseek-reasoner";

/// Generation parameters and streaming behaviour shared by every conversation.
///
/// Every field has a default, so a partial `config.toml` is valid.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// API root, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model used when reasoning is off.
    pub chat_model: String,
    /// Model used when the conversation's reasoning toggle is on.
    pub reasoner_model: String,
    pub max_tokens: u32,
    pub top_p: f32,
    pub repetition_penalty: Option<f32>,
    /// Consecutive trailing keep-alives after which an ended stream is
    /// considered stalled and re-opened.
    pub stall_keep_alive_threshold: u32,
    /// Delay before re-opening a stalled stream.
    pub retry_backoff_ms: u64,
    /// Delay between `send` and the request, letting the UI settle.
    pub send_settle_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            reasoner_model: DEFAULT_REASONER_MODEL.to_string(),
            max_tokens: 4096,
            top_p: 1.0,
            repetition_penalty: None,
            stall_keep_alive_threshold: 5,
            retry_backoff_ms: 1000,
            send_settle_delay_ms: 100,
        }
    }
}

impl ClientConfig {
    /// Picks the model for a conversation's reasoning toggle.
    pub fn model_for(&self, open_reasoning: bool) -> &str {
        if open_reasoning {
            &self.reasoner_model
        } else {
            &self.chat_model
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.send_settle_delay_ms)
    }

    /// Whether a stream that ended after `trailing_keep_alives` should be retried.
    pub fn is_stalled(&self, trailing_keep_alives: u32) -> bool {
        trailing_keep_alives >= self.stall_keep_alive_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            base_url = "http://localhost:8080/v1"
            retry_backoff_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.stall_keep_alive_threshold, 5);
        assert_eq!(config.model_for(true), DEFAULT_REASONER_MODEL);
        assert_eq!(config.model_for(false), DEFAULT_CHAT_MODEL);
    }

    #[test]
    fn test_stall_threshold() {
        let config = ClientConfig::default();
        assert!(!config.is_stalled(4));
        assert!(config.is_stalled(5));
    }
}
