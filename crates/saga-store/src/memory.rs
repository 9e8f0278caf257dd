//! In-memory saga store for testing and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId, SagaId, Version};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::compensation::{CompensationLogEntry, CompensationOutcome};
use crate::error::{Result, SagaStoreError};
use crate::instance::SagaInstance;
use crate::store::SagaStore;

#[derive(Default)]
struct StoreInner {
    sagas: HashMap<SagaId, SagaInstance>,
    by_order: HashMap<OrderId, SagaId>,
    log: Vec<CompensationLogEntry>,
}

/// In-memory [`SagaStore`] with the same compare-and-swap semantics as
/// the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sagas.
    pub async fn saga_count(&self) -> usize {
        self.inner.read().await.sagas.len()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, instance: &SagaInstance) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.by_order.contains_key(&instance.order_id()) {
            return Err(SagaStoreError::AlreadyExists(instance.order_id()));
        }
        inner
            .by_order
            .insert(instance.order_id(), instance.saga_id());
        inner.sagas.insert(instance.saga_id(), instance.clone());
        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.inner.read().await.sagas.get(&saga_id).cloned())
    }

    async fn load_by_order(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_order
            .get(&order_id)
            .and_then(|saga_id| inner.sagas.get(saga_id))
            .cloned())
    }

    async fn compare_and_swap(&self, instance: &SagaInstance) -> Result<Version> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .sagas
            .get(&instance.saga_id())
            .ok_or(SagaStoreError::NotFound(instance.saga_id()))?;

        if stored.version() != instance.version() {
            return Err(SagaStoreError::Conflict {
                saga_id: instance.saga_id(),
                expected: instance.version(),
                actual: stored.version(),
            });
        }

        let mut updated = instance.clone();
        updated.version = instance.version().next();
        let new_version = updated.version;
        inner.sagas.insert(instance.saga_id(), updated);
        Ok(new_version)
    }

    async fn list_in_flight(&self) -> Result<Vec<SagaInstance>> {
        let inner = self.inner.read().await;
        let mut in_flight: Vec<SagaInstance> = inner
            .sagas
            .values()
            .filter(|s| !s.state().is_terminal())
            .cloned()
            .collect();
        in_flight.sort_by_key(SagaInstance::created_at);
        Ok(in_flight)
    }

    async fn append_compensation(&self, entry: &CompensationLogEntry) -> Result<()> {
        self.inner.write().await.log.push(entry.clone());
        Ok(())
    }

    async fn complete_compensation(
        &self,
        entry_id: Uuid,
        outcome: CompensationOutcome,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .log
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or(SagaStoreError::LogEntryNotFound(entry_id))?;
        entry.outcome = outcome;
        entry.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn compensation_log(&self, saga_id: SagaId) -> Result<Vec<CompensationLogEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .log
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .cloned()
            .collect())
    }
}
