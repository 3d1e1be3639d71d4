//! Error types for the agent binary.
//!
//! [`AgentError`] is the top-level error type that wraps all possible
//! failure modes during startup, operator commands, and shutdown.

/// Top-level error for the agent binary.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: dynpool_core::config::ConfigError,
    },

    /// Talking to Redis failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying Redis error.
        #[from]
        source: dynpool_registry::DbError,
    },

    /// Rendering output failed.
    #[error("output error: {source}")]
    Output {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },

    /// An override request was refused before it was sent.
    #[error("invalid override: core_size={core_size} max_size={max_size} (need core_size <= max_size and max_size >= 1)")]
    InvalidOverride {
        /// Requested core size.
        core_size: usize,
        /// Requested max size.
        max_size: usize,
    },
}
