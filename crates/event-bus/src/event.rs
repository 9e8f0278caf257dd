//! Domain events and their wire representation.
//!
//! Every event type has a fixed, validated schema. Routing keys follow
//! the `domain.action` convention; consumers bind to the keys they need.

use chrono::{DateTime, Utc};
use common::{EventId, Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// The fixed set of event types flowing through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OrderCreated,
    InventoryReserved,
    InventoryReserveFailed,
    PaymentCompleted,
    PaymentFailed,
    OrderCancelRequested,
    PaymentRequested,
    OrderConfirmed,
    OrderCancelled,
    PaymentRefund,
    InventoryRelease,
    OrderCancellation,
    PaymentRefunded,
    InventoryReleased,
    OrderCancellationApplied,
    CompensationFailed,
}

impl EventType {
    /// Returns the dot-separated routing key for this event type.
    pub fn routing_key(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::InventoryReserved => "inventory.reserved",
            EventType::InventoryReserveFailed => "inventory.reserve_failed",
            EventType::PaymentCompleted => "payment.completed",
            EventType::PaymentFailed => "payment.failed",
            EventType::OrderCancelRequested => "order.cancel_requested",
            EventType::PaymentRequested => "payment.requested",
            EventType::OrderConfirmed => "order.confirmed",
            EventType::OrderCancelled => "order.cancelled",
            EventType::PaymentRefund => "payment.refund",
            EventType::InventoryRelease => "inventory.release",
            EventType::OrderCancellation => "order.cancellation",
            EventType::PaymentRefunded => "payment.refunded",
            EventType::InventoryReleased => "inventory.released",
            EventType::OrderCancellationApplied => "order.cancellation_applied",
            EventType::CompensationFailed => "saga.compensation_failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.routing_key())
    }
}

/// A line item on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Payload for `order.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub shipping_address: String,
}

/// Payload for `inventory.reserved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservedData {
    pub order_id: OrderId,
    pub reservation_id: String,
}

/// Payload for `payment.completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompletedData {
    pub order_id: OrderId,
    pub payment_id: String,
}

/// Payload for failure events (`inventory.reserve_failed`, `payment.failed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailureData {
    pub order_id: OrderId,
    pub reason: String,
}

/// Payload for `order.cancel_requested`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequestData {
    pub order_id: OrderId,
    pub reason: Option<String>,
}

/// Payload for the `payment.requested` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestData {
    pub order_id: OrderId,
    pub amount: Money,
}

/// Payload for terminal notifications (`order.confirmed`, `order.cancelled`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStateData {
    pub order_id: OrderId,
    pub final_state: String,
}

/// Payload for the `payment.refund` undo command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCommandData {
    pub order_id: OrderId,
    pub payment_id: Option<String>,
}

/// Payload for the `inventory.release` undo command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCommandData {
    pub order_id: OrderId,
    pub reservation_id: Option<String>,
}

/// Payload for the `order.cancellation` undo command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationCommandData {
    pub order_id: OrderId,
    pub reason: String,
}

/// Result reported by an owning service for an undo command.
///
/// `NothingToUndo` is a success: the forward effect never materialized,
/// so there was nothing to reverse. It is recorded distinctly in the
/// compensation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UndoOutcome {
    Done,
    NothingToUndo,
    Failed { reason: String },
}

impl UndoOutcome {
    /// Returns true if the undo action succeeded (including "nothing to undo").
    pub fn is_success(&self) -> bool {
        !matches!(self, UndoOutcome::Failed { .. })
    }
}

/// Payload for undo acknowledgements
/// (`inventory.released`, `payment.refunded`, `order.cancellation_applied`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoAckData {
    pub order_id: OrderId,
    pub outcome: UndoOutcome,
}

/// Payload for the `saga.compensation_failed` operator alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationFailedData {
    pub order_id: OrderId,
    pub step: String,
    pub reason: String,
}

/// Typed event payloads, tagged with their routing key on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "order.created")]
    OrderCreated(OrderCreatedData),
    #[serde(rename = "inventory.reserved")]
    InventoryReserved(InventoryReservedData),
    #[serde(rename = "inventory.reserve_failed")]
    InventoryReserveFailed(StepFailureData),
    #[serde(rename = "payment.completed")]
    PaymentCompleted(PaymentCompletedData),
    #[serde(rename = "payment.failed")]
    PaymentFailed(StepFailureData),
    #[serde(rename = "order.cancel_requested")]
    OrderCancelRequested(CancelRequestData),
    #[serde(rename = "payment.requested")]
    PaymentRequested(PaymentRequestData),
    #[serde(rename = "order.confirmed")]
    OrderConfirmed(FinalStateData),
    #[serde(rename = "order.cancelled")]
    OrderCancelled(FinalStateData),
    #[serde(rename = "payment.refund")]
    PaymentRefund(RefundCommandData),
    #[serde(rename = "inventory.release")]
    InventoryRelease(ReleaseCommandData),
    #[serde(rename = "order.cancellation")]
    OrderCancellation(CancellationCommandData),
    #[serde(rename = "payment.refunded")]
    PaymentRefunded(UndoAckData),
    #[serde(rename = "inventory.released")]
    InventoryReleased(UndoAckData),
    #[serde(rename = "order.cancellation_applied")]
    OrderCancellationApplied(UndoAckData),
    #[serde(rename = "saga.compensation_failed")]
    CompensationFailed(CompensationFailedData),
}

impl EventPayload {
    /// Returns the event type of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::OrderCreated(_) => EventType::OrderCreated,
            EventPayload::InventoryReserved(_) => EventType::InventoryReserved,
            EventPayload::InventoryReserveFailed(_) => EventType::InventoryReserveFailed,
            EventPayload::PaymentCompleted(_) => EventType::PaymentCompleted,
            EventPayload::PaymentFailed(_) => EventType::PaymentFailed,
            EventPayload::OrderCancelRequested(_) => EventType::OrderCancelRequested,
            EventPayload::PaymentRequested(_) => EventType::PaymentRequested,
            EventPayload::OrderConfirmed(_) => EventType::OrderConfirmed,
            EventPayload::OrderCancelled(_) => EventType::OrderCancelled,
            EventPayload::PaymentRefund(_) => EventType::PaymentRefund,
            EventPayload::InventoryRelease(_) => EventType::InventoryRelease,
            EventPayload::OrderCancellation(_) => EventType::OrderCancellation,
            EventPayload::PaymentRefunded(_) => EventType::PaymentRefunded,
            EventPayload::InventoryReleased(_) => EventType::InventoryReleased,
            EventPayload::OrderCancellationApplied(_) => EventType::OrderCancellationApplied,
            EventPayload::CompensationFailed(_) => EventType::CompensationFailed,
        }
    }

    /// Returns the order this payload refers to.
    pub fn order_id(&self) -> OrderId {
        match self {
            EventPayload::OrderCreated(d) => d.order_id,
            EventPayload::InventoryReserved(d) => d.order_id,
            EventPayload::InventoryReserveFailed(d) => d.order_id,
            EventPayload::PaymentCompleted(d) => d.order_id,
            EventPayload::PaymentFailed(d) => d.order_id,
            EventPayload::OrderCancelRequested(d) => d.order_id,
            EventPayload::PaymentRequested(d) => d.order_id,
            EventPayload::OrderConfirmed(d) => d.order_id,
            EventPayload::OrderCancelled(d) => d.order_id,
            EventPayload::PaymentRefund(d) => d.order_id,
            EventPayload::InventoryRelease(d) => d.order_id,
            EventPayload::OrderCancellation(d) => d.order_id,
            EventPayload::PaymentRefunded(d) => d.order_id,
            EventPayload::InventoryReleased(d) => d.order_id,
            EventPayload::OrderCancellationApplied(d) => d.order_id,
            EventPayload::CompensationFailed(d) => d.order_id,
        }
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            EventPayload::OrderCreated(d) => {
                if d.items.is_empty() {
                    return Err("order.created with no items".to_string());
                }
                if d.items.iter().any(|i| i.quantity == 0) {
                    return Err("order.created with zero-quantity item".to_string());
                }
                if d.total_amount.as_cents() <= 0 {
                    return Err("order.created with non-positive total".to_string());
                }
                Ok(())
            }
            EventPayload::InventoryReserved(d) => {
                if d.reservation_id.is_empty() {
                    return Err("inventory.reserved without reservation_id".to_string());
                }
                Ok(())
            }
            EventPayload::PaymentCompleted(d) => {
                if d.payment_id.is_empty() {
                    return Err("payment.completed without payment_id".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// An immutable fact published on the bus.
///
/// `correlation_id` always equals the `order_id` of the payload and is
/// used to locate the saga instance. `event_id` is unique per publish
/// and drives idempotent de-duplication on the consumer side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: EventId,
    pub correlation_id: OrderId,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Creates a new event; the correlation id is taken from the payload.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_id: EventId::new(),
            correlation_id: payload.order_id(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Returns the event type.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Serializes the event to its JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses and validates an event from its wire form.
    ///
    /// Malformed or semantically invalid payloads are rejected with
    /// [`BusError::Validation`]; the bus routes such messages to the
    /// dead-letter path rather than retrying.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        let event: DomainEvent = serde_json::from_slice(bytes)
            .map_err(|e| BusError::Validation(format!("malformed event: {e}")))?;
        if event.correlation_id != event.payload.order_id() {
            return Err(BusError::Validation(format!(
                "correlation id {} does not match payload order id {}",
                event.correlation_id,
                event.payload.order_id()
            )));
        }
        event.payload.validate().map_err(BusError::Validation)?;
        Ok(event)
    }
}

// Convenience constructors
impl DomainEvent {
    pub fn order_created(
        order_id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        total_amount: Money,
        shipping_address: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::OrderCreated(OrderCreatedData {
            order_id,
            user_id,
            items,
            total_amount,
            shipping_address: shipping_address.into(),
        }))
    }

    pub fn inventory_reserved(order_id: OrderId, reservation_id: impl Into<String>) -> Self {
        Self::new(EventPayload::InventoryReserved(InventoryReservedData {
            order_id,
            reservation_id: reservation_id.into(),
        }))
    }

    pub fn inventory_reserve_failed(order_id: OrderId, reason: impl Into<String>) -> Self {
        Self::new(EventPayload::InventoryReserveFailed(StepFailureData {
            order_id,
            reason: reason.into(),
        }))
    }

    pub fn payment_completed(order_id: OrderId, payment_id: impl Into<String>) -> Self {
        Self::new(EventPayload::PaymentCompleted(PaymentCompletedData {
            order_id,
            payment_id: payment_id.into(),
        }))
    }

    pub fn payment_failed(order_id: OrderId, reason: impl Into<String>) -> Self {
        Self::new(EventPayload::PaymentFailed(StepFailureData {
            order_id,
            reason: reason.into(),
        }))
    }

    pub fn cancel_requested(order_id: OrderId, reason: Option<String>) -> Self {
        Self::new(EventPayload::OrderCancelRequested(CancelRequestData {
            order_id,
            reason,
        }))
    }

    pub fn payment_requested(order_id: OrderId, amount: Money) -> Self {
        Self::new(EventPayload::PaymentRequested(PaymentRequestData {
            order_id,
            amount,
        }))
    }

    pub fn order_confirmed(order_id: OrderId, final_state: impl Into<String>) -> Self {
        Self::new(EventPayload::OrderConfirmed(FinalStateData {
            order_id,
            final_state: final_state.into(),
        }))
    }

    pub fn order_cancelled(order_id: OrderId, final_state: impl Into<String>) -> Self {
        Self::new(EventPayload::OrderCancelled(FinalStateData {
            order_id,
            final_state: final_state.into(),
        }))
    }

    pub fn payment_refund(order_id: OrderId, payment_id: Option<String>) -> Self {
        Self::new(EventPayload::PaymentRefund(RefundCommandData {
            order_id,
            payment_id,
        }))
    }

    pub fn inventory_release(order_id: OrderId, reservation_id: Option<String>) -> Self {
        Self::new(EventPayload::InventoryRelease(ReleaseCommandData {
            order_id,
            reservation_id,
        }))
    }

    pub fn order_cancellation(order_id: OrderId, reason: impl Into<String>) -> Self {
        Self::new(EventPayload::OrderCancellation(CancellationCommandData {
            order_id,
            reason: reason.into(),
        }))
    }

    pub fn payment_refunded(order_id: OrderId, outcome: UndoOutcome) -> Self {
        Self::new(EventPayload::PaymentRefunded(UndoAckData {
            order_id,
            outcome,
        }))
    }

    pub fn inventory_released(order_id: OrderId, outcome: UndoOutcome) -> Self {
        Self::new(EventPayload::InventoryReleased(UndoAckData {
            order_id,
            outcome,
        }))
    }

    pub fn cancellation_applied(order_id: OrderId, outcome: UndoOutcome) -> Self {
        Self::new(EventPayload::OrderCancellationApplied(UndoAckData {
            order_id,
            outcome,
        }))
    }

    pub fn compensation_failed(
        order_id: OrderId,
        step: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::CompensationFailed(CompensationFailedData {
            order_id,
            step: step.into(),
            reason: reason.into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_items() -> Vec<OrderItem> {
        vec![OrderItem {
            product_id: "SKU-001".to_string(),
            product_name: "Widget".to_string(),
            quantity: 2,
            unit_price: Money::from_cents(1000),
        }]
    }

    #[test]
    fn routing_keys_follow_domain_action_convention() {
        assert_eq!(EventType::OrderCreated.routing_key(), "order.created");
        assert_eq!(
            EventType::InventoryReserveFailed.routing_key(),
            "inventory.reserve_failed"
        );
        assert_eq!(EventType::PaymentRefund.routing_key(), "payment.refund");
        assert_eq!(
            EventType::CompensationFailed.routing_key(),
            "saga.compensation_failed"
        );
    }

    #[test]
    fn event_type_matches_payload() {
        let order_id = OrderId::new();
        assert_eq!(
            DomainEvent::inventory_reserved(order_id, "RES-1").event_type(),
            EventType::InventoryReserved
        );
        assert_eq!(
            DomainEvent::payment_failed(order_id, "card_declined").event_type(),
            EventType::PaymentFailed
        );
        assert_eq!(
            DomainEvent::cancellation_applied(order_id, UndoOutcome::Done).event_type(),
            EventType::OrderCancellationApplied
        );
    }

    #[test]
    fn correlation_id_is_taken_from_payload() {
        let order_id = OrderId::new();
        let event = DomainEvent::payment_completed(order_id, "PAY-1");
        assert_eq!(event.correlation_id, order_id);
    }

    #[test]
    fn wire_roundtrip() {
        let order_id = OrderId::new();
        let event = DomainEvent::order_created(
            order_id,
            UserId::new(),
            sample_items(),
            Money::from_cents(2000),
            "1 Main St",
        );

        let bytes = event.to_bytes().unwrap();
        let decoded = DomainEvent::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.correlation_id, order_id);
        assert_eq!(decoded.event_type(), EventType::OrderCreated);
    }

    #[test]
    fn wire_format_uses_routing_key_tag() {
        let event = DomainEvent::inventory_reserved(OrderId::new(), "RES-9");
        let value: serde_json::Value =
            serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(value["payload"]["type"], "inventory.reserved");
        assert_eq!(value["payload"]["data"]["reservation_id"], "RES-9");
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let raw = serde_json::json!({
            "event_id": EventId::new(),
            "correlation_id": OrderId::new(),
            "occurred_at": Utc::now(),
            "payload": { "type": "warehouse.exploded", "data": {} }
        });
        let err = DomainEvent::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(err, BusError::Validation(_)));
    }

    #[test]
    fn empty_order_is_rejected() {
        let event = DomainEvent::order_created(
            OrderId::new(),
            UserId::new(),
            vec![],
            Money::from_cents(100),
            "1 Main St",
        );
        let err = DomainEvent::from_bytes(&event.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, BusError::Validation(_)));
    }

    #[test]
    fn correlation_mismatch_is_rejected() {
        let mut event = DomainEvent::payment_completed(OrderId::new(), "PAY-1");
        event.correlation_id = OrderId::new();
        let err = DomainEvent::from_bytes(&event.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, BusError::Validation(_)));
    }

    #[test]
    fn undo_outcome_success() {
        assert!(UndoOutcome::Done.is_success());
        assert!(UndoOutcome::NothingToUndo.is_success());
        assert!(
            !UndoOutcome::Failed {
                reason: "gateway down".to_string()
            }
            .is_success()
        );
    }

    #[test]
    fn undo_outcome_wire_format() {
        let json = serde_json::to_value(UndoOutcome::NothingToUndo).unwrap();
        assert_eq!(json["status"], "nothing_to_undo");
        let failed: UndoOutcome =
            serde_json::from_value(serde_json::json!({"status": "failed", "reason": "down"}))
                .unwrap();
        assert_eq!(
            failed,
            UndoOutcome::Failed {
                reason: "down".to_string()
            }
        );
    }
}
