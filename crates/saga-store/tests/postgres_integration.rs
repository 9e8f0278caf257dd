//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{Money, OrderId, SagaId, Version};
use saga_store::{
    CompensationLogEntry, CompensationOutcome, CompensationStep, PostgresSagaStore, SagaInstance,
    SagaStore, SagaStoreError, SagaState,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!("../../../migrations/001_create_sagas_table.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE sagas, compensation_log")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

#[tokio::test]
#[serial]
async fn create_and_load_roundtrip() {
    let store = get_test_store().await;

    let mut saga = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    saga.mark_inventory_reserved("RES-1");
    store.create(&saga).await.unwrap();

    let by_id = store.load(saga.saga_id()).await.unwrap().unwrap();
    assert_eq!(by_id.saga_id(), saga.saga_id());
    assert_eq!(by_id.state(), SagaState::InventoryReserved);
    assert_eq!(by_id.reservation_id(), Some("RES-1"));

    let by_order = store.load_by_order(saga.order_id()).await.unwrap().unwrap();
    assert_eq!(by_order.saga_id(), saga.saga_id());
}

#[tokio::test]
#[serial]
async fn duplicate_order_violates_unique_constraint() {
    let store = get_test_store().await;

    let order_id = OrderId::new();
    store.create(&SagaInstance::new(order_id, Money::from_cents(4500))).await.unwrap();

    let err = store
        .create(&SagaInstance::new(order_id, Money::from_cents(4500)))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaStoreError::AlreadyExists(_)));
}

#[tokio::test]
#[serial]
async fn load_missing_returns_none() {
    let store = get_test_store().await;
    assert!(store.load(SagaId::new()).await.unwrap().is_none());
    assert!(store.load_by_order(OrderId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn compare_and_swap_advances_version() {
    let store = get_test_store().await;

    let saga = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    store.create(&saga).await.unwrap();

    let mut loaded = store.load(saga.saga_id()).await.unwrap().unwrap();
    loaded.mark_inventory_reserved("RES-1");
    let new_version = store.compare_and_swap(&loaded).await.unwrap();
    assert_eq!(new_version, Version::new(2));

    let stored = store.load(saga.saga_id()).await.unwrap().unwrap();
    assert_eq!(stored.version(), Version::new(2));
    assert_eq!(stored.state(), SagaState::InventoryReserved);
}

#[tokio::test]
#[serial]
async fn stale_compare_and_swap_conflicts() {
    let store = get_test_store().await;

    let saga = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    store.create(&saga).await.unwrap();

    let mut first = store.load(saga.saga_id()).await.unwrap().unwrap();
    let mut second = store.load(saga.saga_id()).await.unwrap().unwrap();

    first.mark_inventory_reserved("RES-1");
    store.compare_and_swap(&first).await.unwrap();

    second.fail("inventory timeout");
    let err = store.compare_and_swap(&second).await.unwrap_err();
    assert!(matches!(
        err,
        SagaStoreError::Conflict {
            expected,
            actual,
            ..
        } if expected == Version::new(1) && actual == Version::new(2)
    ));

    // Winner's write is intact.
    let stored = store.load(saga.saga_id()).await.unwrap().unwrap();
    assert_eq!(stored.state(), SagaState::InventoryReserved);
}

#[tokio::test]
#[serial]
async fn compare_and_swap_on_missing_saga_fails() {
    let store = get_test_store().await;
    let saga = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    let err = store.compare_and_swap(&saga).await.unwrap_err();
    assert!(matches!(err, SagaStoreError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn list_in_flight_skips_terminal_sagas() {
    let store = get_test_store().await;

    let active = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    store.create(&active).await.unwrap();

    let done = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    store.create(&done).await.unwrap();
    let mut done = store.load(done.saga_id()).await.unwrap().unwrap();
    done.complete();
    store.compare_and_swap(&done).await.unwrap();

    let mut compensating = SagaInstance::new(OrderId::new(), Money::from_cents(4500));
    store.create(&compensating).await.unwrap();
    compensating.fail("payment declined");
    store.compare_and_swap(&compensating).await.unwrap();

    let in_flight = store.list_in_flight().await.unwrap();
    assert_eq!(in_flight.len(), 2);
    assert!(in_flight.iter().all(|s| !s.state().is_terminal()));
}

#[tokio::test]
#[serial]
async fn compensation_log_lifecycle() {
    let store = get_test_store().await;
    let saga_id = SagaId::new();

    let first = CompensationLogEntry::begin(saga_id, CompensationStep::PaymentRefund, 1);
    store.append_compensation(&first).await.unwrap();
    store
        .complete_compensation(first.entry_id, CompensationOutcome::Failed)
        .await
        .unwrap();

    let second = CompensationLogEntry::begin(saga_id, CompensationStep::PaymentRefund, 2);
    store.append_compensation(&second).await.unwrap();
    store
        .complete_compensation(second.entry_id, CompensationOutcome::Succeeded)
        .await
        .unwrap();

    let log = store.compensation_log(saga_id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].attempt, 1);
    assert_eq!(log[0].outcome, CompensationOutcome::Failed);
    assert_eq!(log[1].attempt, 2);
    assert_eq!(log[1].outcome, CompensationOutcome::Succeeded);
    assert!(log.iter().all(|e| e.finished_at.is_some()));
}

#[tokio::test]
#[serial]
async fn completing_unknown_log_entry_fails() {
    let store = get_test_store().await;
    let err = store
        .complete_compensation(uuid::Uuid::new_v4(), CompensationOutcome::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaStoreError::LogEntryNotFound(_)));
}
