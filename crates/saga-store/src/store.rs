//! Store trait.

use async_trait::async_trait;
use common::{OrderId, SagaId, Version};
use uuid::Uuid;

use crate::compensation::{CompensationLogEntry, CompensationOutcome};
use crate::error::Result;
use crate::instance::SagaInstance;

/// Durable record of saga instances and the compensation log.
///
/// All implementations must be thread-safe (Send + Sync). The
/// compare-and-swap contract is the only serialization mechanism for
/// concurrent transitions on one saga; no external lock manager exists.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Persists a newly created instance.
    ///
    /// Fails with `AlreadyExists` if a saga for the same order is
    /// already present (duplicate `order.created` deliveries hit this
    /// path and treat it as an idempotent no-op).
    async fn create(&self, instance: &SagaInstance) -> Result<()>;

    /// Loads an instance by saga id.
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>>;

    /// Loads an instance by its order correlation key.
    async fn load_by_order(&self, order_id: OrderId) -> Result<Option<SagaInstance>>;

    /// Writes `instance` conditioned on the stored version still
    /// matching `instance.version()`.
    ///
    /// On success the stored (and returned) version is
    /// `instance.version().next()`. Fails with `Conflict` when a
    /// concurrent transition won; the caller re-reads and retries its
    /// decision.
    async fn compare_and_swap(&self, instance: &SagaInstance) -> Result<Version>;

    /// Returns every instance not in a terminal state, oldest first.
    /// Used at startup to resume timeouts and compensation.
    async fn list_in_flight(&self) -> Result<Vec<SagaInstance>>;

    /// Appends a compensation log entry (one per undo attempt).
    async fn append_compensation(&self, entry: &CompensationLogEntry) -> Result<()>;

    /// Closes a pending log entry with its final outcome.
    async fn complete_compensation(
        &self,
        entry_id: Uuid,
        outcome: CompensationOutcome,
    ) -> Result<()>;

    /// Returns the compensation log for a saga, in attempt order.
    async fn compensation_log(&self, saga_id: SagaId) -> Result<Vec<CompensationLogEntry>>;
}
