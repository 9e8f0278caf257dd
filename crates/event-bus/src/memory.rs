//! In-process event bus implementation.
//!
//! Used by tests and single-process deployments. Mirrors the delivery
//! contract of a real broker binding: at-least-once delivery per
//! subscription, redelivery on retryable handler failure, and a
//! dead-letter path for messages that can never be processed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, EventHandler};
use crate::error::{BusError, HandlerError};
use crate::event::{DomainEvent, EventType};

/// Tuning for the in-memory bus.
#[derive(Debug, Clone)]
pub struct InMemoryBusConfig {
    /// Redeliveries after the first attempt before dead-lettering.
    pub max_redeliveries: u32,
    /// Pause between redeliveries.
    pub redelivery_delay: Duration,
    /// How long `disconnect` waits for in-flight handlers.
    pub drain_timeout: Duration,
}

impl Default for InMemoryBusConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: 3,
            redelivery_delay: Duration::from_millis(25),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// A message that could not be processed, with the reason it was parked.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub bytes: Vec<u8>,
    pub reason: String,
}

struct Subscriber {
    types: HashSet<EventType>,
    handler: Arc<dyn EventHandler>,
}

struct BusInner {
    config: InMemoryBusConfig,
    connected: AtomicBool,
    subscribers: RwLock<Vec<Subscriber>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    published: Mutex<Vec<DomainEvent>>,
    fail_next_publishes: AtomicU32,
}

impl BusInner {
    fn dead_letter(&self, bytes: Vec<u8>, reason: String) {
        tracing::warn!(%reason, "message routed to dead-letter queue");
        metrics::counter!("events_dead_lettered_total").increment(1);
        self.dead_letters
            .lock()
            .unwrap()
            .push(DeadLetter { bytes, reason });
    }
}

/// In-memory [`EventBus`] with at-least-once delivery semantics.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<BusInner>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(InMemoryBusConfig::default())
    }
}

impl InMemoryEventBus {
    /// Creates a new bus with the given configuration.
    pub fn new(config: InMemoryBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                connected: AtomicBool::new(false),
                subscribers: RwLock::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                dead_letters: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                fail_next_publishes: AtomicU32::new(0),
            }),
        }
    }

    /// Delivers raw wire bytes as a foreign producer would.
    ///
    /// Malformed messages go straight to the dead-letter queue.
    pub fn inject_raw(&self, bytes: Vec<u8>) {
        match DomainEvent::from_bytes(&bytes) {
            Ok(event) => self.dispatch(event, bytes),
            Err(err) => self.inner.dead_letter(bytes, err.to_string()),
        }
    }

    /// Waits until every delivery spawned so far (including deliveries
    /// triggered by handlers publishing follow-up events) has finished.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<_> = self.inner.tasks.lock().unwrap().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            join_all(handles).await;
        }
    }

    /// All events accepted by `publish`, in order.
    pub fn published(&self) -> Vec<DomainEvent> {
        self.inner.published.lock().unwrap().clone()
    }

    /// Published events of one type, in order.
    pub fn published_of_type(&self, event_type: EventType) -> Vec<DomainEvent> {
        self.inner
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Contents of the dead-letter queue.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().unwrap().clone()
    }

    /// Makes the next `n` publishes fail with a transport error.
    pub fn set_fail_next_publishes(&self, n: u32) {
        self.inner.fail_next_publishes.store(n, Ordering::SeqCst);
    }

    fn dispatch(&self, event: DomainEvent, bytes: Vec<u8>) {
        let event_type = event.event_type();
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .inner
            .subscribers
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.types.contains(&event_type))
            .map(|s| s.handler.clone())
            .collect();

        let mut tasks = self.inner.tasks.lock().unwrap();
        tasks.retain(|h| !h.is_finished());
        for handler in handlers {
            let inner = self.inner.clone();
            let bytes = bytes.clone();
            tasks.push(tokio::spawn(deliver(inner, handler, bytes)));
        }
    }
}

async fn deliver(inner: Arc<BusInner>, handler: Arc<dyn EventHandler>, bytes: Vec<u8>) {
    let event = match DomainEvent::from_bytes(&bytes) {
        Ok(event) => event,
        Err(err) => {
            inner.dead_letter(bytes, err.to_string());
            return;
        }
    };

    let mut attempt = 0u32;
    loop {
        match handler.handle(event.clone()).await {
            Ok(()) => return,
            Err(HandlerError::Validation(reason)) => {
                inner.dead_letter(bytes, reason);
                return;
            }
            Err(HandlerError::Retryable(reason)) => {
                if attempt >= inner.config.max_redeliveries {
                    inner.dead_letter(bytes, format!("redelivery budget exhausted: {reason}"));
                    return;
                }
                attempt += 1;
                metrics::counter!("events_redelivered_total").increment(1);
                tracing::warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type(),
                    attempt,
                    %reason,
                    "handler failed, redelivering"
                );
                tokio::time::sleep(inner.config.redelivery_delay).await;
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, event: &DomainEvent) -> Result<(), BusError> {
        let remaining = self.inner.fail_next_publishes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner
                .fail_next_publishes
                .store(remaining - 1, Ordering::SeqCst);
            return Err(BusError::Publish("injected transport failure".to_string()));
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(BusError::Connection("bus is not connected".to_string()));
        }

        let bytes = event.to_bytes()?;
        self.inner.published.lock().unwrap().push(event.clone());
        self.dispatch(event.clone(), bytes);
        Ok(())
    }

    async fn subscribe(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        self.inner.subscribers.write().unwrap().push(Subscriber {
            types: event_types.iter().copied().collect(),
            handler,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        let handles: Vec<_> = self.inner.tasks.lock().unwrap().drain(..).collect();
        if tokio::time::timeout(self.inner.config.drain_timeout, join_all(handles))
            .await
            .is_err()
        {
            // Remaining handlers are detached, not cancelled.
            tracing::warn!("drain timeout elapsed with handlers still in flight");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, OrderId, UserId};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<DomainEvent>>,
        attempts: AtomicUsize,
        fail_remaining: AtomicU32,
        reject_as_invalid: AtomicBool,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn handled(&self) -> Vec<DomainEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: DomainEvent) -> Result<(), HandlerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.reject_as_invalid.load(Ordering::SeqCst) {
                return Err(HandlerError::Validation("unusable payload".to_string()));
            }
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(HandlerError::Retryable("store unavailable".to_string()));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn test_bus() -> InMemoryEventBus {
        InMemoryEventBus::new(InMemoryBusConfig {
            max_redeliveries: 3,
            redelivery_delay: Duration::from_millis(1),
            drain_timeout: Duration::from_secs(1),
        })
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscribers() {
        let bus = test_bus();
        bus.connect().await.unwrap();

        let handler = RecordingHandler::new();
        bus.subscribe(&[EventType::InventoryReserved], handler.clone())
            .await
            .unwrap();

        let order_id = OrderId::new();
        bus.publish(&DomainEvent::inventory_reserved(order_id, "RES-1"))
            .await
            .unwrap();
        bus.drain().await;

        let handled = handler.handled();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].correlation_id, order_id);
    }

    #[tokio::test]
    async fn publish_skips_non_matching_subscribers() {
        let bus = test_bus();
        bus.connect().await.unwrap();

        let handler = RecordingHandler::new();
        bus.subscribe(&[EventType::PaymentCompleted], handler.clone())
            .await
            .unwrap();

        bus.publish(&DomainEvent::inventory_reserved(OrderId::new(), "RES-1"))
            .await
            .unwrap();
        bus.drain().await;

        assert!(handler.handled().is_empty());
    }

    #[tokio::test]
    async fn publish_fails_when_not_connected() {
        let bus = test_bus();
        let err = bus
            .publish(&DomainEvent::inventory_reserved(OrderId::new(), "RES-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Connection(_)));
    }

    #[tokio::test]
    async fn retryable_handler_failure_triggers_redelivery() {
        let bus = test_bus();
        bus.connect().await.unwrap();

        let handler = RecordingHandler::new();
        handler.fail_remaining.store(2, Ordering::SeqCst);
        bus.subscribe(&[EventType::PaymentCompleted], handler.clone())
            .await
            .unwrap();

        bus.publish(&DomainEvent::payment_completed(OrderId::new(), "PAY-1"))
            .await
            .unwrap();
        bus.drain().await;

        // Two failed attempts, then success; handled exactly once.
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(handler.handled().len(), 1);
        assert!(bus.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn redelivery_budget_exhaustion_dead_letters() {
        let bus = test_bus();
        bus.connect().await.unwrap();

        let handler = RecordingHandler::new();
        handler.fail_remaining.store(u32::MAX, Ordering::SeqCst);
        bus.subscribe(&[EventType::PaymentCompleted], handler.clone())
            .await
            .unwrap();

        bus.publish(&DomainEvent::payment_completed(OrderId::new(), "PAY-1"))
            .await
            .unwrap();
        bus.drain().await;

        // First attempt plus max_redeliveries, then parked.
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 4);
        assert!(handler.handled().is_empty());
        assert_eq!(bus.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_dead_letters_without_retry() {
        let bus = test_bus();
        bus.connect().await.unwrap();

        let handler = RecordingHandler::new();
        handler.reject_as_invalid.store(true, Ordering::SeqCst);
        bus.subscribe(&[EventType::PaymentCompleted], handler.clone())
            .await
            .unwrap();

        bus.publish(&DomainEvent::payment_completed(OrderId::new(), "PAY-1"))
            .await
            .unwrap();
        bus.drain().await;

        assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(bus.dead_letters().len(), 1);
        assert!(bus.dead_letters()[0].reason.contains("unusable payload"));
    }

    #[tokio::test]
    async fn invalid_payload_dead_letters_before_reaching_handler() {
        let bus = test_bus();
        bus.connect().await.unwrap();

        let handler = RecordingHandler::new();
        bus.subscribe(&[EventType::OrderCreated], handler.clone())
            .await
            .unwrap();

        // Serializes fine but fails boundary validation on delivery.
        let event = DomainEvent::order_created(
            OrderId::new(),
            UserId::new(),
            vec![],
            Money::from_cents(100),
            "1 Main St",
        );
        bus.publish(&event).await.unwrap();
        bus.drain().await;

        assert_eq!(handler.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(bus.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn inject_raw_malformed_message_dead_letters() {
        let bus = test_bus();
        bus.connect().await.unwrap();
        bus.inject_raw(b"{not json".to_vec());
        assert_eq!(bus.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_waits_for_in_flight_handlers() {
        struct SlowHandler {
            done: Arc<AtomicBool>,
        }

        #[async_trait]
        impl EventHandler for SlowHandler {
            async fn handle(&self, _event: DomainEvent) -> Result<(), HandlerError> {
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.done.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let bus = test_bus();
        bus.connect().await.unwrap();
        let done = Arc::new(AtomicBool::new(false));
        bus.subscribe(
            &[EventType::PaymentCompleted],
            Arc::new(SlowHandler { done: done.clone() }),
        )
        .await
        .unwrap();

        bus.publish(&DomainEvent::payment_completed(OrderId::new(), "PAY-1"))
            .await
            .unwrap();
        bus.disconnect().await.unwrap();

        assert!(done.load(Ordering::SeqCst));
        let err = bus
            .publish(&DomainEvent::payment_completed(OrderId::new(), "PAY-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Connection(_)));
    }

    #[tokio::test]
    async fn injected_publish_failures_surface_as_publish_errors() {
        let bus = test_bus();
        bus.connect().await.unwrap();
        bus.set_fail_next_publishes(1);

        let event = DomainEvent::payment_completed(OrderId::new(), "PAY-1");
        let err = bus.publish(&event).await.unwrap_err();
        assert!(matches!(err, BusError::Publish(_)));

        bus.publish(&event).await.unwrap();
        assert_eq!(bus.published().len(), 1);
    }
}
