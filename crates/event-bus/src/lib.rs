//! Event bus client for the order saga system.
//!
//! Provides a thin, reliable publish/subscribe interface: typed domain
//! events with fixed, validated schemas, at-least-once delivery per
//! subscription, and bounded-retry publishing for saga-critical events.
//!
//! Duplicate delivery is possible and expected; every handler registered
//! through this crate must be idempotent.

pub mod bus;
pub mod error;
pub mod event;
pub mod memory;
pub mod retry;

pub use bus::{EventBus, EventHandler};
pub use error::{BusError, HandlerError};
pub use event::{DomainEvent, EventPayload, EventType, UndoOutcome};
pub use memory::{InMemoryBusConfig, InMemoryEventBus};
pub use retry::{connect_with_retry, publish_with_retry};
