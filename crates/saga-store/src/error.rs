//! Saga store error types.

use common::{OrderId, SagaId, Version};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// A compare-and-swap lost against a concurrent transition.
    /// The caller re-reads and re-resolves its decision.
    #[error("version conflict for saga {saga_id}: expected {expected}, found {actual}")]
    Conflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// A saga already exists for this order.
    #[error("saga already exists for order {0}")]
    AlreadyExists(OrderId),

    /// The saga was not found.
    #[error("saga not found: {0}")]
    NotFound(SagaId),

    /// The compensation log entry was not found.
    #[error("compensation log entry not found: {0}")]
    LogEntryNotFound(Uuid),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
