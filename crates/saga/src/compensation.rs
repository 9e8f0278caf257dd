//! Compensation executor.
//!
//! Given a saga that entered `Compensating`, undoes each completed step
//! from the last to the first by publishing the step's undo command and
//! waiting for the owning service's acknowledgement, then finalizes the
//! order with `order.cancellation`. Every attempt is recorded in the
//! compensation log.
//!
//! If an undo step exhausts its retries the saga is parked in
//! `CompensationFailed` and processing halts; earlier undo steps are
//! never attempted after a failure, since their preconditions may
//! depend on the failed step having succeeded. An alert event surfaces
//! the saga for operator intervention.

use std::sync::Arc;

use event_bus::{DomainEvent, EventBus, UndoOutcome, publish_with_retry};
use saga_store::{
    CompensationLogEntry, CompensationOutcome, CompensationStep, SagaInstance, SagaState,
    SagaStore, SagaStoreError, plan_compensation,
};

use crate::acks::AckRegistry;
use crate::config::SagaConfig;
use crate::error::SagaError;

/// Replays completed steps' inverse actions in strict reverse order.
pub struct CompensationExecutor<S, B> {
    store: S,
    bus: B,
    acks: Arc<AckRegistry>,
    config: SagaConfig,
}

impl<S, B> CompensationExecutor<S, B>
where
    S: SagaStore + Clone,
    B: EventBus + Clone,
{
    pub fn new(store: S, bus: B, acks: Arc<AckRegistry>, config: SagaConfig) -> Self {
        Self {
            store,
            bus,
            acks,
            config,
        }
    }

    /// Drives a compensating saga to `Compensated` or
    /// `CompensationFailed`.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.saga_id(), order_id = %saga.order_id()))]
    pub async fn run(&self, saga: &SagaInstance) -> Result<(), SagaError> {
        let plan = plan_compensation(saga.completed_steps());
        tracing::info!(steps = plan.len(), "starting compensation");

        for step in plan {
            match self.execute_step(saga, step).await {
                Ok(()) => {}
                Err(SagaError::CompensationExhausted { step, reason }) => {
                    self.park(saga, step, &reason).await?;
                    return Ok(());
                }
                Err(other) => return Err(other),
            }
        }

        self.finish(saga).await
    }

    /// Runs one undo step with bounded retries, logging every attempt.
    async fn execute_step(
        &self,
        saga: &SagaInstance,
        step: CompensationStep,
    ) -> Result<(), SagaError> {
        let order_id = saga.order_id();
        let backoff = self.config.compensation_backoff();
        let max_attempts = self.config.compensation_max_attempts;
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            let entry = CompensationLogEntry::begin(saga.saga_id(), step, attempt);
            let entry_id = entry.entry_id;
            self.store.append_compensation(&entry).await?;

            let failure = match self.attempt_undo(saga, step).await {
                Ok(outcome) if outcome.is_success() => {
                    let logged = match outcome {
                        UndoOutcome::NothingToUndo => CompensationOutcome::NothingToUndo,
                        _ => CompensationOutcome::Succeeded,
                    };
                    self.store.complete_compensation(entry_id, logged).await?;
                    tracing::info!(%order_id, %step, attempt, outcome = %logged, "undo step succeeded");
                    return Ok(());
                }
                Ok(UndoOutcome::Failed { reason }) => reason,
                Ok(_) => unreachable!("successful outcomes returned above"),
                Err(reason) => reason,
            };

            self.store
                .complete_compensation(entry_id, CompensationOutcome::Failed)
                .await?;
            metrics::counter!("compensation_attempts_failed_total").increment(1);
            tracing::warn!(%order_id, %step, attempt, reason = %failure, "undo step attempt failed");
            last_failure = failure;

            if attempt < max_attempts {
                tokio::time::sleep(backoff.delay_for(attempt - 1)).await;
            }
        }

        Err(SagaError::CompensationExhausted {
            step,
            reason: last_failure,
        })
    }

    /// Publishes the undo command and waits for its acknowledgement.
    async fn attempt_undo(
        &self,
        saga: &SagaInstance,
        step: CompensationStep,
    ) -> std::result::Result<UndoOutcome, String> {
        let order_id = saga.order_id();
        let command = match step {
            CompensationStep::PaymentRefund => {
                DomainEvent::payment_refund(order_id, saga.payment_id().map(str::to_string))
            }
            CompensationStep::InventoryRelease => {
                DomainEvent::inventory_release(order_id, saga.reservation_id().map(str::to_string))
            }
            CompensationStep::OrderCancellation => DomainEvent::order_cancellation(
                order_id,
                saga.last_error().unwrap_or("saga failed").to_string(),
            ),
        };

        let rx = self.acks.register(order_id, step);
        if let Err(err) = publish_with_retry(&self.bus, &command, self.config.publish_backoff()).await
        {
            self.acks.unregister(order_id, step);
            return Err(format!("undo command publish failed: {err}"));
        }

        match tokio::time::timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err("acknowledgement waiter dropped".to_string()),
            Err(_) => {
                self.acks.unregister(order_id, step);
                Err("acknowledgement timed out".to_string())
            }
        }
    }

    /// All undo steps succeeded: terminal `Compensated`, emit
    /// `order.cancelled`.
    async fn finish(&self, saga: &SagaInstance) -> Result<(), SagaError> {
        self.close(saga, |s| s.mark_compensated()).await?;
        metrics::counter!("saga_compensated").increment(1);
        tracing::info!("saga compensated");

        let event =
            DomainEvent::order_cancelled(saga.order_id(), SagaState::Compensated.as_str());
        if let Err(err) = publish_with_retry(&self.bus, &event, self.config.publish_backoff()).await
        {
            tracing::error!(error = %err, "failed to publish order.cancelled");
        }
        Ok(())
    }

    /// Retry exhaustion: terminal `CompensationFailed`, raise the
    /// operator alert.
    async fn park(
        &self,
        saga: &SagaInstance,
        step: CompensationStep,
        reason: &str,
    ) -> Result<(), SagaError> {
        self.close(saga, |s| {
            s.mark_compensation_failed(format!("{step}: {reason}"));
        })
        .await?;
        metrics::counter!("saga_compensation_failed_total").increment(1);
        tracing::error!(%step, %reason, "compensation exhausted, operator intervention required");

        let alert = DomainEvent::compensation_failed(saga.order_id(), step.as_str(), reason);
        if let Err(err) = publish_with_retry(&self.bus, &alert, self.config.publish_backoff()).await
        {
            tracing::error!(error = %err, "failed to publish compensation alert");
        }
        Ok(())
    }

    /// Writes the terminal transition against the freshest copy of the
    /// saga. A replica that already moved it out of `Compensating` wins.
    async fn close(
        &self,
        saga: &SagaInstance,
        mutate: impl Fn(&mut SagaInstance),
    ) -> Result<(), SagaError> {
        for _ in 0..self.config.cas_retries {
            let Some(mut current) = self.store.load(saga.saga_id()).await? else {
                return Ok(());
            };
            if current.state() != SagaState::Compensating {
                tracing::warn!(state = %current.state(), "saga left compensating elsewhere");
                return Ok(());
            }
            mutate(&mut current);
            match self.store.compare_and_swap(&current).await {
                Ok(_) => return Ok(()),
                Err(SagaStoreError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(SagaError::ConflictRetriesExhausted(saga.order_id()))
    }
}
