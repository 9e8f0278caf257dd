//! The pure state machine.
//!
//! `decide` and `decide_timeout` map (current state, input) to a
//! decision without touching storage or the bus; the orchestrator
//! applies decisions through compare-and-swap. Keeping this pure makes
//! the full legal/illegal transition grid directly testable.

use event_bus::EventPayload;
use saga_store::{SagaState, SagaStep};

/// What the orchestrator should do with a delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Append the inventory step, swap timers, request payment.
    ReserveInventory { reservation_id: String },
    /// Append the payment step, swap timers, open the confirmation window.
    CompletePayment { payment_id: String },
    /// Record the error and begin compensation.
    Fail { reason: String },
    /// Event does not apply in the current state; the instance is
    /// unchanged and the event is logged as discarded.
    Discard { reason: &'static str },
}

/// What the orchestrator should do when a step timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutDecision {
    /// The guarded step never completed; fail and compensate.
    Fail { reason: String },
    /// The confirmation window elapsed without a cancel; complete.
    Complete,
    /// The saga already advanced past the guarded step; no-op.
    Discard { reason: &'static str },
}

/// Resolves a delivered event against the current saga state.
///
/// Terminal sagas discard everything; duplicates whose target state was
/// already reached discard silently (idempotent redelivery); event/state
/// pairs outside the legal table discard with the instance unchanged.
pub fn decide(state: SagaState, payload: &EventPayload) -> Decision {
    if state.is_terminal() {
        return Decision::Discard {
            reason: "saga is in a terminal state",
        };
    }

    match payload {
        EventPayload::InventoryReserved(data) => match state {
            SagaState::Started => Decision::ReserveInventory {
                reservation_id: data.reservation_id.clone(),
            },
            SagaState::InventoryReserved | SagaState::PaymentCompleted => Decision::Discard {
                reason: "inventory already reserved",
            },
            _ => Decision::Discard {
                reason: "saga is no longer awaiting inventory",
            },
        },

        EventPayload::InventoryReserveFailed(data) => match state {
            SagaState::Started => Decision::Fail {
                reason: format!("inventory reservation failed: {}", data.reason),
            },
            _ => Decision::Discard {
                reason: "saga is no longer awaiting inventory",
            },
        },

        EventPayload::PaymentCompleted(data) => match state {
            SagaState::InventoryReserved => Decision::CompletePayment {
                payment_id: data.payment_id.clone(),
            },
            SagaState::PaymentCompleted => Decision::Discard {
                reason: "payment already completed",
            },
            _ => Decision::Discard {
                reason: "saga is not awaiting payment",
            },
        },

        EventPayload::PaymentFailed(data) => match state {
            SagaState::InventoryReserved => Decision::Fail {
                reason: format!("payment failed: {}", data.reason),
            },
            _ => Decision::Discard {
                reason: "saga is not awaiting payment",
            },
        },

        EventPayload::OrderCancelRequested(data) => {
            if state.can_cancel() {
                Decision::Fail {
                    reason: match &data.reason {
                        Some(reason) => format!("cancel requested: {reason}"),
                        None => "cancel requested".to_string(),
                    },
                }
            } else {
                Decision::Discard {
                    reason: "cancel does not apply to this state",
                }
            }
        }

        // Saga creation is handled before the state machine; anything
        // reaching here is a duplicate for an existing instance.
        EventPayload::OrderCreated(_) => Decision::Discard {
            reason: "saga already exists for this order",
        },

        _ => Decision::Discard {
            reason: "event is not an orchestrator input",
        },
    }
}

/// Resolves a fired step timer against the current saga state.
///
/// A timer firing after the saga advanced past the step it guards is a
/// no-op; the confirmation timer elapsing is the success path.
pub fn decide_timeout(state: SagaState, step: SagaStep) -> TimeoutDecision {
    if state.is_terminal() {
        return TimeoutDecision::Discard {
            reason: "saga is in a terminal state",
        };
    }

    match (state, step) {
        (SagaState::Started, SagaStep::InventoryReservation) => TimeoutDecision::Fail {
            reason: "inventory reservation timed out".to_string(),
        },
        (SagaState::InventoryReserved, SagaStep::Payment) => TimeoutDecision::Fail {
            reason: "payment processing timed out".to_string(),
        },
        (SagaState::PaymentCompleted, SagaStep::Confirmation) => TimeoutDecision::Complete,
        _ => TimeoutDecision::Discard {
            reason: "saga advanced past the guarded step",
        },
    }
}
