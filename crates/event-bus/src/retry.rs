//! Bounded-retry helpers for bus operations.

use common::Backoff;

use crate::bus::EventBus;
use crate::error::BusError;
use crate::event::DomainEvent;

/// Publishes a saga-critical event, retrying transport failures with the
/// given backoff schedule.
///
/// Validation and serialization errors are returned immediately. When
/// the schedule is exhausted the last transport error is returned; the
/// caller decides how to escalate (the orchestrator fails the saga).
pub async fn publish_with_retry<B: EventBus + ?Sized>(
    bus: &B,
    event: &DomainEvent,
    mut backoff: Backoff,
) -> Result<(), BusError> {
    loop {
        match bus.publish(event).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() => match backoff.next() {
                Some(delay) => {
                    tracing::warn!(
                        event_type = %event.event_type(),
                        correlation_id = %event.correlation_id,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// Establishes the broker connection, retrying with capped exponential
/// backoff. Used at orchestrator startup.
pub async fn connect_with_retry<B: EventBus + ?Sized>(
    bus: &B,
    mut backoff: Backoff,
) -> Result<(), BusError> {
    loop {
        match bus.connect().await {
            Ok(()) => return Ok(()),
            Err(err) => match backoff.next() {
                Some(delay) => {
                    tracing::warn!(
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "bus connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::memory::{InMemoryBusConfig, InMemoryEventBus};
    use common::OrderId;
    use std::time::Duration;

    fn short_backoff(attempts: u32) -> Backoff {
        Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            attempts,
        )
    }

    #[tokio::test]
    async fn publish_with_retry_recovers_from_transient_failures() {
        let bus = InMemoryEventBus::new(InMemoryBusConfig::default());
        bus.connect().await.unwrap();
        bus.set_fail_next_publishes(2);

        let event = DomainEvent::payment_requested(OrderId::new(), common::Money::from_cents(100));
        publish_with_retry(&bus, &event, short_backoff(3))
            .await
            .unwrap();

        assert_eq!(bus.published_of_type(EventType::PaymentRequested).len(), 1);
    }

    #[tokio::test]
    async fn publish_with_retry_gives_up_after_schedule() {
        let bus = InMemoryEventBus::new(InMemoryBusConfig::default());
        bus.connect().await.unwrap();
        bus.set_fail_next_publishes(10);

        let event = DomainEvent::payment_requested(OrderId::new(), common::Money::from_cents(100));
        let err = publish_with_retry(&bus, &event, short_backoff(2))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn connect_with_retry_succeeds_immediately_on_healthy_bus() {
        let bus = InMemoryEventBus::new(InMemoryBusConfig::default());
        connect_with_retry(&bus, short_backoff(3)).await.unwrap();

        let event = DomainEvent::payment_requested(OrderId::new(), common::Money::from_cents(100));
        bus.publish(&event).await.unwrap();
    }
}
