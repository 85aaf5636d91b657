use async_trait::async_trait;
use seekchat_core::credential::CredentialPrompt;
use seekchat_core::error::{ChatError, Result};
use seekchat_infrastructure::EnvCredentialPrompt;
use std::io::{BufRead, Write};

/// Reads the API key from `DEEPSEEK_API_KEY`, or asks on the terminal.
#[derive(Default)]
pub struct StdinCredentialPrompt {
    env: EnvCredentialPrompt,
}

#[async_trait]
impl CredentialPrompt for StdinCredentialPrompt {
    async fn request_api_key(&self) -> Result<String> {
        if let Ok(key) = self.env.request_api_key().await {
            return Ok(key);
        }

        let line = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
            let mut stderr = std::io::stderr();
            write!(stderr, "DeepSeek API key: ")?;
            stderr.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await
        .map_err(|e| ChatError::io(format!("Failed to spawn blocking task: {}", e)))??;

        let key = line.trim();
        if key.is_empty() {
            return Err(ChatError::MissingApiKey("no API key entered".into()));
        }
        Ok(key.to_string())
    }
}
