//! Saga state machine states.

use serde::{Deserialize, Serialize};

/// The state of an order saga in its lifecycle.
///
/// Forward progress:
/// ```text
/// Started ──► InventoryReserved ──► PaymentCompleted ──► Completed
/// ```
/// Any forward state can fail into `Failed`, which immediately enters
/// `Compensating`; compensation ends in `Compensated` or, after retry
/// exhaustion, `CompensationFailed` (operator intervention required).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    /// Saga created in response to `order.created`.
    Started,

    /// Inventory has been reserved; waiting on payment.
    InventoryReserved,

    /// Payment has completed; waiting out the confirmation window.
    PaymentCompleted,

    /// All steps completed successfully (terminal).
    Completed,

    /// A step failed or timed out; error recorded, compensation pending.
    Failed,

    /// Compensating transactions are in progress.
    Compensating,

    /// All undo steps succeeded (terminal).
    Compensated,

    /// An undo step exhausted its retries (terminal, operator action).
    CompensationFailed,
}

impl SagaState {
    /// Returns true if no further event may mutate the instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::CompensationFailed
        )
    }

    /// Returns true if an external cancel request can force compensation
    /// from this state.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal() && !matches!(self, SagaState::Failed | SagaState::Compensating)
    }

    /// Position along the forward path, if this is a forward state.
    /// Used to detect stale duplicates of advancing events.
    pub fn forward_rank(&self) -> Option<u8> {
        match self {
            SagaState::Started => Some(0),
            SagaState::InventoryReserved => Some(1),
            SagaState::PaymentCompleted => Some(2),
            SagaState::Completed => Some(3),
            _ => None,
        }
    }

    /// Returns the state name as stored and logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "started",
            SagaState::InventoryReserved => "inventory_reserved",
            SagaState::PaymentCompleted => "payment_completed",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
            SagaState::Compensating => "compensating",
            SagaState::Compensated => "compensated",
            SagaState::CompensationFailed => "compensation_failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SagaState::Started),
            "inventory_reserved" => Ok(SagaState::InventoryReserved),
            "payment_completed" => Ok(SagaState::PaymentCompleted),
            "completed" => Ok(SagaState::Completed),
            "failed" => Ok(SagaState::Failed),
            "compensating" => Ok(SagaState::Compensating),
            "compensated" => Ok(SagaState::Compensated),
            "compensation_failed" => Ok(SagaState::CompensationFailed),
            other => Err(format!("unknown saga state: {other}")),
        }
    }
}
