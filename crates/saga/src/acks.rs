//! Correlation of undo commands with their acknowledgement events.

use std::collections::HashMap;
use std::sync::Mutex;

use common::OrderId;
use event_bus::UndoOutcome;
use saga_store::CompensationStep;
use tokio::sync::oneshot;

/// Matches an in-flight undo command to the acknowledgement event the
/// owning service publishes for it.
///
/// The executor registers a waiter before publishing; the orchestrator's
/// subscription resolves it when the ack arrives. At most one waiter per
/// (order, step) exists at a time; re-registering (a retry attempt)
/// replaces the previous waiter.
#[derive(Default)]
pub struct AckRegistry {
    pending: Mutex<HashMap<(OrderId, CompensationStep), oneshot::Sender<UndoOutcome>>>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for the next ack of (order, step).
    pub fn register(
        &self,
        order_id: OrderId,
        step: CompensationStep,
    ) -> oneshot::Receiver<UndoOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert((order_id, step), tx);
        rx
    }

    /// Drops the waiter for (order, step) after an attempt timed out.
    pub fn unregister(&self, order_id: OrderId, step: CompensationStep) {
        self.pending.lock().unwrap().remove(&(order_id, step));
    }

    /// Resolves a waiter with the reported outcome. Returns false when
    /// nobody is waiting (a late ack after timeout, or a duplicate
    /// delivery); such acks are logged and discarded by the caller.
    pub fn resolve(&self, order_id: OrderId, step: CompensationStep, outcome: UndoOutcome) -> bool {
        match self.pending.lock().unwrap().remove(&(order_id, step)) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_wakes_the_registered_waiter() {
        let registry = AckRegistry::new();
        let order_id = OrderId::new();

        let rx = registry.register(order_id, CompensationStep::PaymentRefund);
        assert!(registry.resolve(order_id, CompensationStep::PaymentRefund, UndoOutcome::Done));
        assert_eq!(rx.await.unwrap(), UndoOutcome::Done);
    }

    #[tokio::test]
    async fn late_ack_with_no_waiter_is_reported() {
        let registry = AckRegistry::new();
        assert!(!registry.resolve(
            OrderId::new(),
            CompensationStep::InventoryRelease,
            UndoOutcome::Done
        ));
    }

    #[tokio::test]
    async fn unregister_drops_the_waiter() {
        let registry = AckRegistry::new();
        let order_id = OrderId::new();

        let rx = registry.register(order_id, CompensationStep::OrderCancellation);
        registry.unregister(order_id, CompensationStep::OrderCancellation);
        assert!(!registry.resolve(
            order_id,
            CompensationStep::OrderCancellation,
            UndoOutcome::Done
        ));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn reregistering_replaces_the_previous_waiter() {
        let registry = AckRegistry::new();
        let order_id = OrderId::new();

        let stale = registry.register(order_id, CompensationStep::PaymentRefund);
        let fresh = registry.register(order_id, CompensationStep::PaymentRefund);

        assert!(registry.resolve(
            order_id,
            CompensationStep::PaymentRefund,
            UndoOutcome::NothingToUndo
        ));
        assert!(stale.await.is_err());
        assert_eq!(fresh.await.unwrap(), UndoOutcome::NothingToUndo);
    }

    #[tokio::test]
    async fn steps_are_correlated_independently() {
        let registry = AckRegistry::new();
        let order_id = OrderId::new();

        let refund = registry.register(order_id, CompensationStep::PaymentRefund);
        let release = registry.register(order_id, CompensationStep::InventoryRelease);

        registry.resolve(
            order_id,
            CompensationStep::InventoryRelease,
            UndoOutcome::Done,
        );
        assert_eq!(release.await.unwrap(), UndoOutcome::Done);

        registry.resolve(
            order_id,
            CompensationStep::PaymentRefund,
            UndoOutcome::Failed {
                reason: "gateway down".to_string(),
            },
        );
        assert!(matches!(refund.await.unwrap(), UndoOutcome::Failed { .. }));
    }
}
