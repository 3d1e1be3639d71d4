//! Error types for the Redis registry.
//!
//! All errors are propagated via [`DbError`], which wraps the underlying
//! [`fred`] and [`serde_json`] errors. At the [`Registry`] boundary they
//! collapse into [`RegistryError`].
//!
//! [`Registry`]: dynpool_core::registry::Registry

use dynpool_core::registry::RegistryError;

/// Errors that can occur talking to Redis.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A Redis command or connection failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for RegistryError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Serialization(source) => Self::Codec { source },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}
