use anyhow::{Context, Result};
use seekchat_application::{ChatCollection, ChatServices};
use seekchat_infrastructure::{
    ConfigService, EmbeddedDocument, JsonDirStore, JsonPreferenceStore, SeekchatPaths,
};
use seekchat_interaction::DeepSeekClientFactory;
use std::path::PathBuf;
use std::sync::Arc;

use super::prompt::StdinCredentialPrompt;

/// Overrides for the platform defaults.
pub struct ContextOptions {
    pub document: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Wires the on-disk stores, the DeepSeek client and the host document into
/// an initialized collection.
pub async fn open(options: &ContextOptions) -> Result<ChatCollection> {
    let document = match &options.document {
        Some(path) => EmbeddedDocument::new(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read document {}", path.display()))?,
        ),
        None => EmbeddedDocument::default(),
    };

    let data_dir = match &options.data_dir {
        Some(dir) => dir.clone(),
        None => SeekchatPaths::data_dir().context("Failed to resolve data directory")?,
    };
    let config_service = match &options.config {
        Some(path) => ConfigService::with_path(path.clone()),
        None => ConfigService::new()?,
    };
    let config = config_service
        .load()
        .with_context(|| format!("Failed to load {}", config_service.path().display()))?;
    tracing::debug!(
        "Storage root {}, document identity '{}'",
        data_dir.display(),
        document.file_key()
    );

    let services = ChatServices::new(
        Arc::new(JsonDirStore::new(&data_dir, document.file_key())),
        Arc::new(JsonPreferenceStore::new(&data_dir)),
        Arc::new(DeepSeekClientFactory::new(config.base_url.clone())),
        Arc::new(StdinCredentialPrompt::default()),
    )
    .with_config(config);

    let collection = ChatCollection::new(Arc::new(services), document);
    collection.init().await?;
    Ok(collection)
}
