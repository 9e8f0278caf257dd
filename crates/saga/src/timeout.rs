//! Per-step timeout scheduling.
//!
//! One timer per (saga, step). Expiries are delivered on a channel the
//! orchestrator drains; cancellation racing an expiry is resolved by
//! the orchestrator's state check, not here, so a timer that fires
//! after being cancelled (or fires twice across restarts) never causes
//! double-processing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use common::SagaId;
use saga_store::SagaStep;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A fired step timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub saga_id: SagaId,
    pub step: SagaStep,
}

/// Schedules and cancels wake-ups for pending saga steps.
pub struct TimeoutManager {
    timers: Mutex<HashMap<(SagaId, SagaStep), JoinHandle<()>>>,
    tx: mpsc::UnboundedSender<Expiry>,
}

impl TimeoutManager {
    /// Creates a manager and the receiver its expiries arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Schedules a wake-up for a pending step, replacing any timer
    /// already armed for the same (saga, step).
    pub fn schedule(&self, saga_id: SagaId, step: SagaStep, duration: Duration) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // Receiver gone means the orchestrator is shutting down.
            let _ = tx.send(Expiry { saga_id, step });
        });

        let mut timers = self.timers.lock().unwrap();
        if let Some(previous) = timers.insert((saga_id, step), handle) {
            previous.abort();
        }
    }

    /// Cancels the timer for a (saga, step). Best-effort: an expiry
    /// already in the channel is discarded by the orchestrator's state
    /// check.
    pub fn cancel(&self, saga_id: SagaId, step: SagaStep) {
        if let Some(handle) = self.timers.lock().unwrap().remove(&(saga_id, step)) {
            handle.abort();
        }
    }

    /// Cancels every timer armed for a saga. Used when it fails over to
    /// compensation or reaches a terminal state.
    pub fn cancel_all(&self, saga_id: SagaId) {
        let mut timers = self.timers.lock().unwrap();
        timers.retain(|(id, _), handle| {
            if *id == saga_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Number of currently armed timers (fired timers linger until
    /// replaced or cancelled; used for tests and introspection).
    pub fn armed_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_its_duration() {
        let (manager, mut rx) = TimeoutManager::new();
        let saga_id = SagaId::new();

        manager.schedule(saga_id, SagaStep::InventoryReservation, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(30)).await;
        let expiry = rx.recv().await.unwrap();
        assert_eq!(expiry.saga_id, saga_id);
        assert_eq!(expiry.step, SagaStep::InventoryReservation);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_does_not_fire() {
        let (manager, mut rx) = TimeoutManager::new();
        let saga_id = SagaId::new();

        manager.schedule(saga_id, SagaStep::Payment, Duration::from_secs(60));
        manager.cancel(saga_id, SagaStep::Payment);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let (manager, mut rx) = TimeoutManager::new();
        let saga_id = SagaId::new();

        manager.schedule(saga_id, SagaStep::Payment, Duration::from_secs(5));
        manager.schedule(saga_id, SagaStep::Payment, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_disarms_every_step_for_the_saga() {
        let (manager, mut rx) = TimeoutManager::new();
        let saga_id = SagaId::new();
        let other = SagaId::new();

        manager.schedule(saga_id, SagaStep::InventoryReservation, Duration::from_secs(30));
        manager.schedule(saga_id, SagaStep::Payment, Duration::from_secs(60));
        manager.schedule(other, SagaStep::InventoryReservation, Duration::from_secs(30));

        manager.cancel_all(saga_id);
        assert_eq!(manager.armed_count(), 1);

        tokio::time::advance(Duration::from_secs(120)).await;
        let expiry = rx.recv().await.unwrap();
        assert_eq!(expiry.saga_id, other);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_harmless() {
        let (manager, mut rx) = TimeoutManager::new();
        let saga_id = SagaId::new();

        manager.schedule(saga_id, SagaStep::Confirmation, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(rx.recv().await.is_some());

        // Fired timers can still be cancelled without effect.
        manager.cancel(saga_id, SagaStep::Confirmation);
        assert!(rx.try_recv().is_err());
    }
}
