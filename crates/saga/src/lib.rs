//! Event-driven saga orchestrator for order transactions.
//!
//! The orchestrator consumes domain events from the bus, validates them
//! against current saga state, advances the state machine through the
//! state store's compare-and-swap, enforces per-step timeouts, and
//! drives compensating actions in reverse order when any step fails or
//! times out.
//!
//! Correctness rests on two mechanisms: every transition is written
//! conditioned on the version read, so concurrent events and racing
//! timers for the same saga serialize at the data layer; and every
//! handler is idempotent, so the bus's at-least-once delivery never
//! applies an event twice.

pub mod acks;
pub mod compensation;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod timeout;
pub mod transition;

pub use acks::AckRegistry;
pub use compensation::CompensationExecutor;
pub use config::SagaConfig;
pub use error::SagaError;
pub use orchestrator::{ORCHESTRATOR_EVENTS, Orchestrator, OrchestratorHandler, spawn_expiry_loop};
pub use services::StubOwningServices;
pub use timeout::{Expiry, TimeoutManager};
pub use transition::{Decision, TimeoutDecision, decide, decide_timeout};
