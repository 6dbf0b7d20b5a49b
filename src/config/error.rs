//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Presence grace period must be between 1 and 300 seconds")]
    InvalidPresenceGrace,

    #[error("Send timeout must be between 100 and 30000 milliseconds")]
    InvalidSendTimeout,

    #[error("Send queue capacity must be at least 1")]
    InvalidSendQueueCapacity,

    #[error("Catch-up window must allow at least 1 event")]
    InvalidCatchUpWindow,

    #[error("Ordering buffer depth must be at least 1")]
    InvalidOrderingBufferDepth,

    #[error("Typing TTL must be between 500 and 60000 milliseconds")]
    InvalidTypingTtl,

    #[error("Retry attempts must be between 1 and 10")]
    InvalidRetryAttempts,
}
