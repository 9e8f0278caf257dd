//! Event bus error types.

use thiserror::Error;

/// Errors surfaced by the bus client.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker is unreachable or the connection was refused.
    /// Retried with capped exponential backoff at startup and on publish.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport failure while publishing an accepted connection.
    #[error("publish error: {0}")]
    Publish(String),

    /// Malformed or semantically invalid event payload. Routed to the
    /// dead-letter path, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization failure while encoding an outgoing event.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Returns true if the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Connection(_) | BusError::Publish(_))
    }
}

/// Errors returned by subscription handlers.
///
/// The bus redelivers on [`HandlerError::Retryable`] and dead-letters on
/// [`HandlerError::Validation`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The event is malformed for this consumer; do not redeliver.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient failure; the bus should redeliver.
    #[error("{0}")]
    Retryable(String),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BusError::Connection("refused".into()).is_retryable());
        assert!(BusError::Publish("reset".into()).is_retryable());
        assert!(!BusError::Validation("bad".into()).is_retryable());
    }
}
