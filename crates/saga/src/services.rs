//! In-memory stand-ins for the owning services.
//!
//! Answer undo commands (`payment.refund`, `inventory.release`,
//! `order.cancellation`) with the corresponding acknowledgement events,
//! with configurable failure injection. Used by tests and local runs;
//! real deployments bind the actual inventory/payment/order services to
//! these routing keys instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use event_bus::{
    BusError, DomainEvent, EventBus, EventHandler, EventPayload, EventType, HandlerError,
    UndoOutcome,
};

#[derive(Default)]
struct StubState {
    released: AtomicU32,
    refunded: AtomicU32,
    cancelled: AtomicU32,
    fail_releases: AtomicU32,
    fail_refunds: AtomicU32,
    fail_cancellations: AtomicU32,
    release_nothing_to_undo: AtomicBool,
}

impl StubState {
    fn take_failure(&self, counter: &AtomicU32) -> bool {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// Bus-attached stub for the inventory, payment, and order services.
#[derive(Clone, Default)]
pub struct StubOwningServices {
    state: Arc<StubState>,
}

impl StubOwningServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the stub to the undo command routing keys.
    pub async fn bind<B>(&self, bus: &B) -> Result<(), BusError>
    where
        B: EventBus + Clone + 'static,
    {
        bus.subscribe(
            &[
                EventType::PaymentRefund,
                EventType::InventoryRelease,
                EventType::OrderCancellation,
            ],
            Arc::new(StubHandler {
                state: self.state.clone(),
                bus: bus.clone(),
            }),
        )
        .await
    }

    /// Makes the next `n` inventory releases report failure.
    pub fn fail_next_releases(&self, n: u32) {
        self.state.fail_releases.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` refunds report failure.
    pub fn fail_next_refunds(&self, n: u32) {
        self.state.fail_refunds.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` order cancellations report failure.
    pub fn fail_next_cancellations(&self, n: u32) {
        self.state.fail_cancellations.store(n, Ordering::SeqCst);
    }

    /// Makes inventory releases report "nothing to undo".
    pub fn set_release_nothing_to_undo(&self, value: bool) {
        self.state
            .release_nothing_to_undo
            .store(value, Ordering::SeqCst);
    }

    pub fn released_count(&self) -> u32 {
        self.state.released.load(Ordering::SeqCst)
    }

    pub fn refunded_count(&self) -> u32 {
        self.state.refunded.load(Ordering::SeqCst)
    }

    pub fn cancelled_count(&self) -> u32 {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

struct StubHandler<B> {
    state: Arc<StubState>,
    bus: B,
}

#[async_trait]
impl<B> EventHandler for StubHandler<B>
where
    B: EventBus + Clone + 'static,
{
    async fn handle(&self, event: DomainEvent) -> Result<(), HandlerError> {
        let order_id = event.correlation_id;
        let ack = match &event.payload {
            EventPayload::PaymentRefund(_) => {
                let outcome = if self.state.take_failure(&self.state.fail_refunds) {
                    UndoOutcome::Failed {
                        reason: "refund gateway unavailable".to_string(),
                    }
                } else {
                    self.state.refunded.fetch_add(1, Ordering::SeqCst);
                    UndoOutcome::Done
                };
                DomainEvent::payment_refunded(order_id, outcome)
            }
            EventPayload::InventoryRelease(_) => {
                let outcome = if self.state.take_failure(&self.state.fail_releases) {
                    UndoOutcome::Failed {
                        reason: "inventory service unavailable".to_string(),
                    }
                } else if self.state.release_nothing_to_undo.load(Ordering::SeqCst) {
                    UndoOutcome::NothingToUndo
                } else {
                    self.state.released.fetch_add(1, Ordering::SeqCst);
                    UndoOutcome::Done
                };
                DomainEvent::inventory_released(order_id, outcome)
            }
            EventPayload::OrderCancellation(_) => {
                let outcome = if self.state.take_failure(&self.state.fail_cancellations) {
                    UndoOutcome::Failed {
                        reason: "order service unavailable".to_string(),
                    }
                } else {
                    self.state.cancelled.fetch_add(1, Ordering::SeqCst);
                    UndoOutcome::Done
                };
                DomainEvent::cancellation_applied(order_id, outcome)
            }
            _ => return Ok(()),
        };

        self.bus
            .publish(&ack)
            .await
            .map_err(|err| HandlerError::Retryable(err.to_string()))
    }
}
