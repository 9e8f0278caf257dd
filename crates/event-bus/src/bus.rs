//! Bus client trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BusError, HandlerError};
use crate::event::{DomainEvent, EventType};

/// A consumer of delivered events.
///
/// Delivery is at-least-once: the same `event_id` may arrive more than
/// once after redelivery or a consumer restart, so implementations MUST
/// be idempotent. Re-applying an already-applied event is a silent
/// no-op, not an error.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: DomainEvent) -> Result<(), HandlerError>;
}

/// Thin, reliable publish/subscribe interface over a message broker.
///
/// Implementations own connection lifecycle and in-flight delivery state
/// only; no durable entity belongs to the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Establishes the broker connection.
    ///
    /// Fails with [`BusError::Connection`] on network or auth failure;
    /// the caller decides the retry policy (see
    /// [`crate::retry::connect_with_retry`]).
    async fn connect(&self) -> Result<(), BusError>;

    /// Serializes and publishes an event, returning once the broker has
    /// accepted it (not once any consumer received it).
    ///
    /// Fails with [`BusError::Publish`] on transport failure; the caller
    /// decides whether to retry or treat the publish as non-critical.
    async fn publish(&self, event: &DomainEvent) -> Result<(), BusError>;

    /// Registers an at-least-once consumer for the given routing keys.
    ///
    /// The bus redelivers a message if the handler fails with a
    /// retryable error, up to a bounded redelivery count.
    async fn subscribe(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError>;

    /// Graceful shutdown: stop accepting publishes, wait for in-flight
    /// handlers to finish or a drain timeout, then close.
    async fn disconnect(&self) -> Result<(), BusError>;
}
