//! The saga orchestrator.
//!
//! Consumes domain events, resolves them against current saga state via
//! the pure transition function, and applies the winning decision with
//! a bounded compare-and-swap loop. Timers, downstream commands, and
//! compensation are driven as side effects of the successful write, so
//! a losing writer re-reads and re-resolves without duplicating them.

use std::sync::Arc;

use chrono::Utc;
use common::{EventId, Money, OrderId, SagaId};
use event_bus::event::UndoAckData;
use event_bus::{
    BusError, DomainEvent, EventBus, EventHandler, EventPayload, EventType, HandlerError,
    publish_with_retry,
};
use saga_store::{
    CompensationStep, SagaInstance, SagaState, SagaStep, SagaStore, SagaStoreError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::acks::AckRegistry;
use crate::compensation::CompensationExecutor;
use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::timeout::{Expiry, TimeoutManager};
use crate::transition::{Decision, TimeoutDecision, decide, decide_timeout};

/// Routing keys the orchestrator binds to.
pub const ORCHESTRATOR_EVENTS: [EventType; 9] = [
    EventType::OrderCreated,
    EventType::InventoryReserved,
    EventType::InventoryReserveFailed,
    EventType::PaymentCompleted,
    EventType::PaymentFailed,
    EventType::OrderCancelRequested,
    EventType::InventoryReleased,
    EventType::PaymentRefunded,
    EventType::OrderCancellationApplied,
];

enum CasOutcome {
    Applied,
    Conflicted,
}

/// Tracks in-flight order transactions and advances their state machine
/// in response to asynchronous domain events and step timeouts.
pub struct Orchestrator<S, B> {
    store: S,
    bus: B,
    timeouts: TimeoutManager,
    acks: Arc<AckRegistry>,
    executor: CompensationExecutor<S, B>,
    config: SagaConfig,
}

impl<S, B> Orchestrator<S, B>
where
    S: SagaStore + Clone + 'static,
    B: EventBus + Clone + 'static,
{
    /// Creates an orchestrator and the receiver its step-timeout
    /// expiries arrive on (drain it with [`spawn_expiry_loop`]).
    pub fn new(store: S, bus: B, config: SagaConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<Expiry>) {
        let (timeouts, expiries) = TimeoutManager::new();
        let acks = Arc::new(AckRegistry::new());
        let executor =
            CompensationExecutor::new(store.clone(), bus.clone(), acks.clone(), config.clone());
        (
            Arc::new(Self {
                store,
                bus,
                timeouts,
                acks,
                executor,
                config,
            }),
            expiries,
        )
    }

    /// Binds the orchestrator's subscriptions on the bus.
    pub async fn bind(self: &Arc<Self>) -> Result<(), BusError> {
        self.bus
            .subscribe(&ORCHESTRATOR_EVENTS, Arc::new(OrchestratorHandler(self.clone())))
            .await
    }

    /// Entry point for every delivered event.
    #[tracing::instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            event_type = %event.event_type(),
            order_id = %event.correlation_id,
        )
    )]
    pub async fn handle_event(&self, event: DomainEvent) -> Result<(), SagaError> {
        metrics::counter!("saga_events_received_total").increment(1);
        match &event.payload {
            EventPayload::OrderCreated(data) => self.start_saga(&event, data.total_amount).await,
            EventPayload::InventoryReleased(data) => {
                self.route_ack(data, CompensationStep::InventoryRelease);
                Ok(())
            }
            EventPayload::PaymentRefunded(data) => {
                self.route_ack(data, CompensationStep::PaymentRefund);
                Ok(())
            }
            EventPayload::OrderCancellationApplied(data) => {
                self.route_ack(data, CompensationStep::OrderCancellation);
                Ok(())
            }
            _ => self.apply(&event).await,
        }
    }

    /// Handles a fired step timer, re-validating current state first: a
    /// timer that lost its race against the advancing event is a no-op.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id, step = %step))]
    pub async fn handle_timeout(&self, saga_id: SagaId, step: SagaStep) -> Result<(), SagaError> {
        let mut order_id = None;
        for _ in 0..self.config.cas_retries {
            let Some(mut saga) = self.store.load(saga_id).await? else {
                return Ok(());
            };
            order_id = Some(saga.order_id());

            match decide_timeout(saga.state(), step) {
                TimeoutDecision::Discard { reason } => {
                    tracing::debug!(state = %saga.state(), %reason, "timer expiry discarded");
                    return Ok(());
                }
                TimeoutDecision::Complete => {
                    saga.complete();
                    match self.store.compare_and_swap(&saga).await {
                        Ok(version) => {
                            saga.set_version(version);
                            self.after_completed(&saga).await;
                            return Ok(());
                        }
                        Err(SagaStoreError::Conflict { .. }) => {
                            self.note_conflict(saga.order_id());
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                TimeoutDecision::Fail { reason } => {
                    metrics::counter!("step_timeouts_total").increment(1);
                    match self.fail_and_compensate(saga, &reason, None).await? {
                        CasOutcome::Applied => return Ok(()),
                        CasOutcome::Conflicted => continue,
                    }
                }
            }
        }

        Err(SagaError::ConflictRetriesExhausted(
            order_id.unwrap_or_default(),
        ))
    }

    /// Re-arms timers and resumes compensation for every in-flight saga
    /// found at startup. Remaining budgets are recomputed from
    /// `updated_at`; already expired budgets fire immediately.
    pub async fn resume_in_flight(&self) -> Result<usize, SagaError> {
        let sagas = self.store.list_in_flight().await?;
        let count = sagas.len();
        tracing::info!(count, "resuming in-flight sagas");

        for saga in sagas {
            match saga.state() {
                SagaState::Started => self.resume_timer(&saga, SagaStep::InventoryReservation),
                SagaState::InventoryReserved => self.resume_timer(&saga, SagaStep::Payment),
                SagaState::PaymentCompleted => self.resume_timer(&saga, SagaStep::Confirmation),
                // Crash landed between the two failure transitions.
                SagaState::Failed => {
                    let mut saga = saga;
                    saga.begin_compensation();
                    match self.store.compare_and_swap(&saga).await {
                        Ok(version) => {
                            saga.set_version(version);
                            self.executor.run(&saga).await?;
                        }
                        Err(SagaStoreError::Conflict { .. }) => {
                            tracing::debug!(saga_id = %saga.saga_id(), "another replica resumed this saga");
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                SagaState::Compensating => self.executor.run(&saga).await?,
                _ => {}
            }
        }
        Ok(count)
    }

    async fn start_saga(&self, event: &DomainEvent, total: Money) -> Result<(), SagaError> {
        let order_id = event.correlation_id;
        if self.store.load_by_order(order_id).await?.is_some() {
            self.discard(event, "saga already exists for this order");
            return Ok(());
        }

        let mut saga = SagaInstance::new(order_id, total);
        saga.record_applied(event.event_id);
        match self.store.create(&saga).await {
            Ok(()) => {}
            Err(SagaStoreError::AlreadyExists(_)) => {
                // A concurrent duplicate delivery won the insert.
                self.discard(event, "saga already exists for this order");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.timeouts.schedule(
            saga.saga_id(),
            SagaStep::InventoryReservation,
            self.config.inventory_timeout,
        );
        metrics::counter!("sagas_started_total").increment(1);
        tracing::info!(saga_id = %saga.saga_id(), "saga started");
        Ok(())
    }

    /// Applies a state-machine event through the compare-and-swap loop:
    /// read, decide, write conditioned on the version read; on conflict
    /// re-read and re-resolve against the winner's state.
    async fn apply(&self, event: &DomainEvent) -> Result<(), SagaError> {
        let order_id = event.correlation_id;

        for _ in 0..self.config.cas_retries {
            let Some(mut saga) = self.store.load_by_order(order_id).await? else {
                self.discard(event, "no saga exists for this order");
                return Ok(());
            };

            if saga.has_applied(event.event_id) {
                self.discard(event, "event already applied");
                return Ok(());
            }

            match decide(saga.state(), &event.payload) {
                Decision::Discard { reason } => {
                    self.discard(event, reason);
                    return Ok(());
                }
                Decision::ReserveInventory { reservation_id } => {
                    saga.mark_inventory_reserved(reservation_id);
                    saga.record_applied(event.event_id);
                    match self.store.compare_and_swap(&saga).await {
                        Ok(version) => {
                            saga.set_version(version);
                            self.after_inventory_reserved(&saga).await?;
                            return Ok(());
                        }
                        Err(SagaStoreError::Conflict { .. }) => {
                            self.note_conflict(order_id);
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Decision::CompletePayment { payment_id } => {
                    saga.mark_payment_completed(payment_id);
                    saga.record_applied(event.event_id);
                    match self.store.compare_and_swap(&saga).await {
                        Ok(version) => {
                            saga.set_version(version);
                            self.after_payment_completed(&saga);
                            return Ok(());
                        }
                        Err(SagaStoreError::Conflict { .. }) => {
                            self.note_conflict(order_id);
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Decision::Fail { reason } => {
                    match self
                        .fail_and_compensate(saga, &reason, Some(event.event_id))
                        .await?
                    {
                        CasOutcome::Applied => return Ok(()),
                        CasOutcome::Conflicted => continue,
                    }
                }
            }
        }

        Err(SagaError::ConflictRetriesExhausted(order_id))
    }

    /// `FAILED` → `COMPENSATING`, both persisted, then the executor.
    ///
    /// The first write races other transitions and may lose (the caller
    /// re-reads); once it lands, the failure is durable even if the
    /// process dies before compensation starts — recovery picks the
    /// saga up from `Failed`.
    async fn fail_and_compensate(
        &self,
        mut saga: SagaInstance,
        reason: &str,
        event_id: Option<EventId>,
    ) -> Result<CasOutcome, SagaError> {
        saga.fail(reason);
        if let Some(event_id) = event_id {
            saga.record_applied(event_id);
        }
        match self.store.compare_and_swap(&saga).await {
            Ok(version) => saga.set_version(version),
            Err(SagaStoreError::Conflict { .. }) => {
                self.note_conflict(saga.order_id());
                return Ok(CasOutcome::Conflicted);
            }
            Err(err) => return Err(err.into()),
        }

        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(
            saga_id = %saga.saga_id(),
            order_id = %saga.order_id(),
            %reason,
            "saga failed, beginning compensation"
        );
        self.timeouts.cancel_all(saga.saga_id());

        saga.begin_compensation();
        match self.store.compare_and_swap(&saga).await {
            Ok(version) => saga.set_version(version),
            Err(SagaStoreError::Conflict { .. }) => {
                // Another replica picked the failed saga up first.
                tracing::debug!(saga_id = %saga.saga_id(), "compensation taken over elsewhere");
                return Ok(CasOutcome::Applied);
            }
            Err(err) => return Err(err.into()),
        }

        self.executor.run(&saga).await?;
        Ok(CasOutcome::Applied)
    }

    async fn after_inventory_reserved(&self, saga: &SagaInstance) -> Result<(), SagaError> {
        let saga_id = saga.saga_id();
        self.timeouts.cancel(saga_id, SagaStep::InventoryReservation);
        self.timeouts
            .schedule(saga_id, SagaStep::Payment, self.config.payment_timeout);
        tracing::info!(%saga_id, "inventory reserved, requesting payment");

        let request = DomainEvent::payment_requested(saga.order_id(), saga.total_amount());
        if let Err(err) =
            publish_with_retry(&self.bus, &request, self.config.publish_backoff()).await
        {
            // Saga-critical publish exhausted its retries: escalate.
            tracing::error!(error = %err, "payment request publish exhausted retries");
            return self
                .force_failure(saga_id, "payment request could not be published")
                .await;
        }
        Ok(())
    }

    fn after_payment_completed(&self, saga: &SagaInstance) {
        let saga_id = saga.saga_id();
        self.timeouts.cancel(saga_id, SagaStep::Payment);
        self.timeouts.schedule(
            saga_id,
            SagaStep::Confirmation,
            self.config.confirmation_timeout,
        );
        tracing::info!(%saga_id, "payment completed, confirmation window open");
    }

    async fn after_completed(&self, saga: &SagaInstance) {
        self.timeouts.cancel_all(saga.saga_id());
        metrics::counter!("saga_completed").increment(1);
        let duration = Utc::now()
            .signed_duration_since(saga.created_at())
            .num_milliseconds() as f64
            / 1000.0;
        metrics::histogram!("saga_duration_seconds").record(duration);
        tracing::info!(saga_id = %saga.saga_id(), duration, "saga completed");

        let event = DomainEvent::order_confirmed(saga.order_id(), SagaState::Completed.as_str());
        if let Err(err) = publish_with_retry(&self.bus, &event, self.config.publish_backoff()).await
        {
            // The saga is already terminal; surface the lost emission.
            tracing::error!(error = %err, "failed to publish order.confirmed");
        }
    }

    /// Forces a non-terminal saga onto the failure path (used when a
    /// saga-critical publish exhausts its retries).
    async fn force_failure(&self, saga_id: SagaId, reason: &str) -> Result<(), SagaError> {
        let mut order_id = None;
        for _ in 0..self.config.cas_retries {
            let Some(saga) = self.store.load(saga_id).await? else {
                return Ok(());
            };
            order_id = Some(saga.order_id());
            if !matches!(
                saga.state(),
                SagaState::Started | SagaState::InventoryReserved | SagaState::PaymentCompleted
            ) {
                return Ok(());
            }
            match self.fail_and_compensate(saga, reason, None).await? {
                CasOutcome::Applied => return Ok(()),
                CasOutcome::Conflicted => continue,
            }
        }
        Err(SagaError::ConflictRetriesExhausted(
            order_id.unwrap_or_default(),
        ))
    }

    fn resume_timer(&self, saga: &SagaInstance, step: SagaStep) {
        let budget = self.config.timeout_for(step);
        let elapsed = Utc::now()
            .signed_duration_since(saga.updated_at())
            .to_std()
            .unwrap_or_default();
        let remaining = budget.saturating_sub(elapsed);
        self.timeouts.schedule(saga.saga_id(), step, remaining);
        tracing::info!(
            saga_id = %saga.saga_id(),
            %step,
            remaining_ms = remaining.as_millis() as u64,
            "resumed step timeout"
        );
    }

    fn route_ack(&self, data: &UndoAckData, step: CompensationStep) {
        if !self.acks.resolve(data.order_id, step, data.outcome.clone()) {
            tracing::debug!(
                order_id = %data.order_id,
                %step,
                "acknowledgement without a waiter discarded"
            );
        }
    }

    fn discard(&self, event: &DomainEvent, reason: &str) {
        metrics::counter!("events_discarded_total").increment(1);
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type(),
            order_id = %event.correlation_id,
            %reason,
            "event discarded"
        );
    }

    fn note_conflict(&self, order_id: OrderId) {
        metrics::counter!("version_conflicts_total").increment(1);
        tracing::debug!(%order_id, "version conflict, re-reading");
    }

    /// Number of currently armed step timers.
    pub fn armed_timers(&self) -> usize {
        self.timeouts.armed_count()
    }
}

/// Bus-facing adapter. Errors are reported as retryable so the bus
/// redelivers; idempotency makes the redelivery safe.
pub struct OrchestratorHandler<S, B>(pub Arc<Orchestrator<S, B>>);

#[async_trait::async_trait]
impl<S, B> EventHandler for OrchestratorHandler<S, B>
where
    S: SagaStore + Clone + 'static,
    B: EventBus + Clone + 'static,
{
    async fn handle(&self, event: DomainEvent) -> Result<(), HandlerError> {
        self.0
            .handle_event(event)
            .await
            .map_err(|err| HandlerError::Retryable(err.to_string()))
    }
}

/// Drains fired step timers into the orchestrator.
pub fn spawn_expiry_loop<S, B>(
    orchestrator: Arc<Orchestrator<S, B>>,
    mut expiries: mpsc::UnboundedReceiver<Expiry>,
) -> JoinHandle<()>
where
    S: SagaStore + Clone + 'static,
    B: EventBus + Clone + 'static,
{
    tokio::spawn(async move {
        while let Some(expiry) = expiries.recv().await {
            if let Err(err) = orchestrator.handle_timeout(expiry.saga_id, expiry.step).await {
                tracing::error!(
                    saga_id = %expiry.saga_id,
                    step = %expiry.step,
                    error = %err,
                    "timeout handling failed"
                );
            }
        }
    })
}
