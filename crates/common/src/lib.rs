//! Shared types used across the saga system.

pub mod backoff;
pub mod money;
pub mod types;

pub use backoff::Backoff;
pub use money::Money;
pub use types::{EventId, OrderId, SagaId, UserId, Version};
