//! Forward steps, timeout-guarded steps, and their undo mapping.

use serde::{Deserialize, Serialize};

/// A pending step guarded by a timeout while the saga waits on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    InventoryReservation,
    Payment,
    Confirmation,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::InventoryReservation => "inventory_reservation",
            SagaStep::Payment => "payment",
            SagaStep::Confirmation => "confirmation",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A forward step recorded in `completed_steps` once its effect landed.
///
/// The list only ever grows while the saga progresses forward and is
/// consumed from the tail backward during compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedStep {
    InventoryReserved,
    PaymentCompleted,
}

impl CompletedStep {
    /// Fixed mapping from a completed step to its undo action.
    pub fn undo(&self) -> CompensationStep {
        match self {
            CompletedStep::InventoryReserved => CompensationStep::InventoryRelease,
            CompletedStep::PaymentCompleted => CompensationStep::PaymentRefund,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletedStep::InventoryReserved => "inventory_reserved",
            CompletedStep::PaymentCompleted => "payment_completed",
        }
    }
}

impl std::fmt::Display for CompletedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An undo action executed during compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStep {
    PaymentRefund,
    InventoryRelease,
    OrderCancellation,
}

impl CompensationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationStep::PaymentRefund => "payment_refund",
            CompensationStep::InventoryRelease => "inventory_release",
            CompensationStep::OrderCancellation => "order_cancellation",
        }
    }
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompensationStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_refund" => Ok(CompensationStep::PaymentRefund),
            "inventory_release" => Ok(CompensationStep::InventoryRelease),
            "order_cancellation" => Ok(CompensationStep::OrderCancellation),
            other => Err(format!("unknown compensation step: {other}")),
        }
    }
}

/// Builds the undo plan for a saga: completed steps reversed, each mapped
/// to its undo action, always finalized with `order_cancellation`.
pub fn plan_compensation(completed: &[CompletedStep]) -> Vec<CompensationStep> {
    let mut plan: Vec<CompensationStep> = completed.iter().rev().map(CompletedStep::undo).collect();
    plan.push(CompensationStep::OrderCancellation);
    plan
}
