use std::sync::Arc;

use seekchat_core::api::ChatClientFactory;
use seekchat_core::config::ClientConfig;
use seekchat_core::credential::CredentialPrompt;
use seekchat_core::repository::{ConversationStore, PreferenceStore};

/// Collaborators shared by the collection and every conversation in it.
#[derive(Clone)]
pub struct ChatServices {
    pub store: Arc<dyn ConversationStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub clients: Arc<dyn ChatClientFactory>,
    pub credentials: Arc<dyn CredentialPrompt>,
    pub config: ClientConfig,
}

impl ChatServices {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        preferences: Arc<dyn PreferenceStore>,
        clients: Arc<dyn ChatClientFactory>,
        credentials: Arc<dyn CredentialPrompt>,
    ) -> Self {
        Self {
            store,
            preferences,
            clients,
            credentials,
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
}
