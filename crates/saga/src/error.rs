//! Orchestrator error types.

use common::OrderId;
use event_bus::BusError;
use saga_store::{CompensationStep, SagaStoreError};
use thiserror::Error;

/// Errors that can occur during saga orchestration.
///
/// Transient infrastructure errors are retried locally (the bus
/// redelivers on a retryable handler failure) and never escalate past
/// this component; business-level failures are expected control flow
/// and drive the FAILED → COMPENSATING path instead of surfacing here.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Conflicting transitions kept winning for the whole retry budget.
    /// Surfaced as retryable so the bus redelivers the event.
    #[error("version conflict retries exhausted for order {0}")]
    ConflictRetriesExhausted(OrderId),

    /// An undo step failed after bounded retries; the saga is parked in
    /// `CompensationFailed` and an operator alert is raised.
    #[error("compensation step '{step}' exhausted retries: {reason}")]
    CompensationExhausted {
        step: CompensationStep,
        reason: String,
    },

    /// State store error.
    #[error("store error: {0}")]
    Store(#[from] SagaStoreError),

    /// Event bus error.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, SagaError>;
