//! Saga instance record.

use chrono::{DateTime, Utc};
use common::{EventId, Money, OrderId, SagaId, Version};
use serde::{Deserialize, Serialize};

use crate::state::SagaState;
use crate::steps::CompletedStep;

/// Bound on the per-instance applied-event window. Old entries age out;
/// the state-aware no-op checks still cover very late redeliveries.
const APPLIED_EVENT_WINDOW: usize = 64;

/// One saga instance per order transaction.
///
/// `completed_steps` only grows during forward progress and is read
/// (never mutated) during compensation. `version` increments on every
/// persisted transition and is the optimistic-concurrency token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    pub(crate) saga_id: SagaId,
    pub(crate) order_id: OrderId,
    /// Order total captured at creation, carried into the
    /// `payment.requested` command.
    pub(crate) total_amount: Money,
    pub(crate) state: SagaState,
    pub(crate) completed_steps: Vec<CompletedStep>,
    /// Recently applied event ids, for idempotent de-duplication.
    pub(crate) applied_events: Vec<EventId>,
    /// Reservation id captured from `inventory.reserved`, referenced by
    /// the `inventory.release` undo command.
    pub(crate) reservation_id: Option<String>,
    /// Payment id captured from `payment.completed`, referenced by the
    /// `payment.refund` undo command.
    pub(crate) payment_id: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) version: Version,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates a new saga in `Started` state for the given order.
    pub fn new(order_id: OrderId, total_amount: Money) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            order_id,
            total_amount,
            state: SagaState::Started,
            completed_steps: Vec::new(),
            applied_events: Vec::new(),
            reservation_id: None,
            payment_id: None,
            last_error: None,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    pub fn reservation_id(&self) -> Option<&str> {
        self.reservation_id.as_deref()
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Synchronizes the in-memory copy with the version returned by a
    /// successful compare-and-swap, so a follow-up transition can be
    /// written without re-reading.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if this event id was already applied to the instance.
    pub fn has_applied(&self, event_id: EventId) -> bool {
        self.applied_events.contains(&event_id)
    }

    /// Records an applied event id in the bounded dedup window.
    pub fn record_applied(&mut self, event_id: EventId) {
        self.applied_events.push(event_id);
        if self.applied_events.len() > APPLIED_EVENT_WINDOW {
            let excess = self.applied_events.len() - APPLIED_EVENT_WINDOW;
            self.applied_events.drain(..excess);
        }
    }

    /// Advances `Started` → `InventoryReserved`, capturing the
    /// reservation id for later compensation.
    pub fn mark_inventory_reserved(&mut self, reservation_id: impl Into<String>) {
        self.state = SagaState::InventoryReserved;
        self.completed_steps.push(CompletedStep::InventoryReserved);
        self.reservation_id = Some(reservation_id.into());
        self.touch();
    }

    /// Advances `InventoryReserved` → `PaymentCompleted`.
    pub fn mark_payment_completed(&mut self, payment_id: impl Into<String>) {
        self.state = SagaState::PaymentCompleted;
        self.completed_steps.push(CompletedStep::PaymentCompleted);
        self.payment_id = Some(payment_id.into());
        self.touch();
    }

    /// Advances to the `Completed` terminal state.
    pub fn complete(&mut self) {
        self.state = SagaState::Completed;
        self.touch();
    }

    /// Records the failure that ends forward progress.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = SagaState::Failed;
        self.last_error = Some(reason.into());
        self.touch();
    }

    /// Enters compensation.
    pub fn begin_compensation(&mut self) {
        self.state = SagaState::Compensating;
        self.touch();
    }

    /// All undo steps succeeded.
    pub fn mark_compensated(&mut self) {
        self.state = SagaState::Compensated;
        self.touch();
    }

    /// An undo step exhausted its retries; park for operator action.
    pub fn mark_compensation_failed(&mut self, reason: impl Into<String>) {
        self.state = SagaState::CompensationFailed;
        self.last_error = Some(reason.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
