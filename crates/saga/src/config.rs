//! Orchestrator configuration loaded from environment variables.

use std::time::Duration;

use common::Backoff;
use saga_store::SagaStep;

/// Tunables for the orchestrator, with the documented defaults.
///
/// Reads from environment variables (all optional):
/// - `SAGA_INVENTORY_TIMEOUT_MS` — inventory reservation budget (default 30000)
/// - `SAGA_PAYMENT_TIMEOUT_MS` — payment processing budget (default 60000)
/// - `SAGA_CONFIRMATION_TIMEOUT_MS` — confirmation window (default 10000)
/// - `SAGA_COMPENSATION_MAX_ATTEMPTS` — undo attempts per step (default 5)
/// - `SAGA_ACK_TIMEOUT_MS` — wait for an undo acknowledgement (default 10000)
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub inventory_timeout: Duration,
    pub payment_timeout: Duration,
    pub confirmation_timeout: Duration,
    /// Bounded re-resolution attempts on a version conflict.
    pub cas_retries: u32,
    /// Backoff for saga-critical publishes before escalating to FAILED.
    pub publish_retry_base: Duration,
    pub publish_retry_cap: Duration,
    pub publish_retry_attempts: u32,
    /// Undo attempts per compensation step before parking the saga.
    pub compensation_max_attempts: u32,
    pub compensation_backoff_base: Duration,
    pub compensation_backoff_cap: Duration,
    /// How long the executor waits for an undo acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            inventory_timeout: Duration::from_secs(30),
            payment_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(10),
            cas_retries: 5,
            publish_retry_base: Duration::from_millis(50),
            publish_retry_cap: Duration::from_secs(2),
            publish_retry_attempts: 4,
            compensation_max_attempts: 5,
            compensation_backoff_base: Duration::from_millis(100),
            compensation_backoff_cap: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inventory_timeout: env_millis("SAGA_INVENTORY_TIMEOUT_MS")
                .unwrap_or(defaults.inventory_timeout),
            payment_timeout: env_millis("SAGA_PAYMENT_TIMEOUT_MS")
                .unwrap_or(defaults.payment_timeout),
            confirmation_timeout: env_millis("SAGA_CONFIRMATION_TIMEOUT_MS")
                .unwrap_or(defaults.confirmation_timeout),
            compensation_max_attempts: std::env::var("SAGA_COMPENSATION_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compensation_max_attempts),
            ack_timeout: env_millis("SAGA_ACK_TIMEOUT_MS").unwrap_or(defaults.ack_timeout),
            ..defaults
        }
    }

    /// Budget for the given timeout-guarded step.
    pub fn timeout_for(&self, step: SagaStep) -> Duration {
        match step {
            SagaStep::InventoryReservation => self.inventory_timeout,
            SagaStep::Payment => self.payment_timeout,
            SagaStep::Confirmation => self.confirmation_timeout,
        }
    }

    /// Backoff schedule for saga-critical publishes.
    pub fn publish_backoff(&self) -> Backoff {
        Backoff::new(
            self.publish_retry_base,
            self.publish_retry_cap,
            self.publish_retry_attempts,
        )
    }

    /// Backoff schedule between undo attempts.
    pub fn compensation_backoff(&self) -> Backoff {
        Backoff::new(
            self.compensation_backoff_base,
            self.compensation_backoff_cap,
            self.compensation_max_attempts,
        )
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
