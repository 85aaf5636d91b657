//! Persistence and host-document plumbing for SeekChat.
//!
//! - [`JsonDirStore`] / [`JsonPreferenceStore`]: on-disk stores
//! - [`InMemoryStore`]: ephemeral store implementing both store traits
//! - [`EmbeddedDocument`]: the export payload codec
//! - [`ConfigService`], [`SeekchatPaths`], [`EnvCredentialPrompt`]

pub mod config_service;
pub mod document;
pub mod env_credential;
pub mod json_dir_store;
pub mod memory_store;
pub mod paths;
pub mod storage;

pub use config_service::ConfigService;
pub use document::{DEFAULT_TEMPLATE, EmbeddedDocument};
pub use env_credential::EnvCredentialPrompt;
pub use json_dir_store::{JsonDirStore, JsonPreferenceStore};
pub use memory_store::InMemoryStore;
pub use paths::SeekchatPaths;
