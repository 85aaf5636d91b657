//! Credential prompt trait.
//!
//! Defines the interface the chat client uses to obtain an API key from the
//! user when none is cached.

use async_trait::async_trait;

use crate::error::Result;

/// Source of a user-supplied API key.
///
/// # Security Note
///
/// Implementations should never log the returned key.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Asks for an API key.
    ///
    /// # Returns
    ///
    /// - `Ok(key)`: A non-empty key supplied by the user
    /// - `Err(ChatError::MissingApiKey)`: The user dismissed the prompt
    async fn request_api_key(&self) -> Result<String>;
}
