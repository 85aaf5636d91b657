//! Error types for SeekChat.

use thiserror::Error;

/// A shared error type for the SeekChat crates.
///
/// Variants follow the chat client's failure taxonomy: configuration
/// (`MissingApiKey`), transport (`Api`, `Transport`), malformed stream data
/// (`MalformedFragment`) and user cancellation (`Cancelled`), plus the
/// storage and serialization errors raised by the persistence layer.
#[derive(Error, Debug, Clone)]
pub enum ChatError {
    /// No API key was cached and the credential prompt produced none.
    #[error("API key is required: {0}")]
    MissingApiKey(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("API Error [{status}]: {message}")]
    Api { status: u16, message: String },

    /// Connection failure or unreadable response body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single streamed event could not be decoded.
    #[error("Malformed fragment: {0}")]
    MalformedFragment(String),

    /// The request was cancelled through its cancellation token.
    #[error("Request cancelled by user")]
    Cancelled,

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Storage backend failure (locking, namespace resolution)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// The host document carries no (or an unreadable) embedded payload.
    #[error("Embedded payload error: {0}")]
    Payload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a Payload error
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a user cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error needs user interaction (credential entry)
    pub fn is_missing_api_key(&self) -> bool {
        matches!(self, Self::MissingApiKey(_))
    }

    /// Check if this is a transport-level failure (HTTP status or connection)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::Transport(_))
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for ChatError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

/// A type alias for `Result<T, ChatError>`.
pub type Result<T> = std::result::Result<T, ChatError>;
