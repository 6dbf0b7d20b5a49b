//! Error types for the delivery core.

use std::collections::HashMap;
use std::fmt;

/// Error codes organized by the failure taxonomy of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Retryable infrastructure failures
    TransientPersistence,

    // Connection-level failures (event survives via projections/catch-up)
    PushTimeout,
    ConnectionClosed,

    // Forced-resync conditions
    OrderingBufferOverflow,
    CatchUpWindowExceeded,
    CursorDegraded,

    // Routing failures
    UnknownRecipient,

    // State errors
    InvalidStateTransition,

    // Input errors
    ValidationFailed,

    // Everything else
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::TransientPersistence => "TRANSIENT_PERSISTENCE",
            ErrorCode::PushTimeout => "PUSH_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::OrderingBufferOverflow => "ORDERING_BUFFER_OVERFLOW",
            ErrorCode::CatchUpWindowExceeded => "CATCH_UP_WINDOW_EXCEEDED",
            ErrorCode::CursorDegraded => "CURSOR_DEGRADED",
            ErrorCode::UnknownRecipient => "UNKNOWN_RECIPIENT",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Standard domain error with code, message, and optional details.
#[derive(Debug, Clone)]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl DomainError {
    /// Creates a new domain error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Creates a transient persistence error (candidate for retry).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransientPersistence, message)
    }

    /// Creates a validation error for a specific field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message).with_detail("field", field)
    }

    /// Adds a detail to the error.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether a bounded-backoff retry is appropriate for this error.
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::TransientPersistence
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.details.is_empty() {
            let mut keys: Vec<_> = self.details.keys().collect();
            keys.sort();
            write!(f, " (")?;
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", key, self.details[*key])?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for DomainError {}
