//! Credential prompt backed by the `DEEPSEEK_API_KEY` environment variable.

use async_trait::async_trait;
use seekchat_core::credential::CredentialPrompt;
use seekchat_core::error::{ChatError, Result};

pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Answers the credential prompt from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentialPrompt {
    var_name: String,
}

impl EnvCredentialPrompt {
    pub fn new() -> Self {
        Self::with_var(API_KEY_ENV)
    }

    pub fn with_var(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }
}

impl Default for EnvCredentialPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialPrompt for EnvCredentialPrompt {
    async fn request_api_key(&self) -> Result<String> {
        match std::env::var(&self.var_name) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ChatError::MissingApiKey(format!(
                "{} is not set",
                self.var_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unset_variable_is_missing_key() {
        let prompt = EnvCredentialPrompt::with_var("SEEKCHAT_TEST_SURELY_UNSET_VARIABLE");
        let err = prompt.request_api_key().await.unwrap_err();
        assert!(err.is_missing_api_key());
    }

    #[tokio::test]
    async fn test_reads_variable() {
        // PATH is set in any environment the tests run in.
        let prompt = EnvCredentialPrompt::with_var("PATH");
        assert!(!prompt.request_api_key().await.unwrap().is_empty());
    }
}
