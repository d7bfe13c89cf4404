//! Error taxonomy shared by repository sessions and engines.

use thiserror::Error;

/// Failures reported by a persistence engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("operation `{operation}` is not supported by this engine")]
    Unsupported { operation: &'static str },
}

impl EngineError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Errors surfaced by a repository session.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("`{entity}` with key `{key}` not found")]
    NotFound { entity: String, key: String },
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("passthrough operation failed: {0}")]
    Passthrough(#[source] EngineError),
    #[error(transparent)]
    Persistence(EngineError),
    #[error("failed to hydrate record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<EngineError> for RepositoryError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation { message } => Self::Validation { message },
            EngineError::Duplicate { constraint } => Self::Validation {
                message: format!("duplicate record violates unique constraint `{constraint}`"),
            },
            other => Self::Persistence(other),
        }
    }
}

/// Failures reported by a cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store `{store}` is unavailable: {message}")]
    Unavailable { store: String, message: String },
    #[error("failed to encode cached value: {0}")]
    Encode(#[from] serde_json::Error),
}
