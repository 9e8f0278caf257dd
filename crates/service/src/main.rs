//! Orchestrator service entry point.

use std::sync::Arc;
use std::time::Duration;

use common::Backoff;
use event_bus::{EventBus, InMemoryBusConfig, InMemoryEventBus, connect_with_retry};
use saga::{Orchestrator, SagaConfig, StubOwningServices, spawn_expiry_loop};
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use service::config::Config;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    // 3. Event bus. In-process transport; a broker binding drops in
    //    behind the same trait.
    let bus = InMemoryEventBus::new(InMemoryBusConfig::default());
    connect_with_retry(
        &bus,
        Backoff::new(Duration::from_millis(200), Duration::from_secs(5), 5),
    )
    .await
    .expect("bus connection failed");

    // 4. Saga store: PostgreSQL when DATABASE_URL is set, in-memory
    //    otherwise.
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("database connection failed");
            let store = PostgresSagaStore::new(pool);
            store.run_migrations().await.expect("migrations failed");
            run(store, bus, config, metrics_handle).await;
        }
        None => run(InMemorySagaStore::new(), bus, config, metrics_handle).await,
    }
}

async fn run<S>(
    store: S,
    bus: InMemoryEventBus,
    config: Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) where
    S: SagaStore + Clone + 'static,
{
    // 5. Orchestrator: subscriptions, timeout drain, startup recovery
    let saga_config = SagaConfig::from_env();
    let (orchestrator, expiries) = Orchestrator::new(store.clone(), bus.clone(), saga_config);
    orchestrator.bind().await.expect("subscription binding failed");

    // Stand-ins answer undo commands until the owning services bind.
    let stubs = StubOwningServices::new();
    stubs.bind(&bus).await.expect("stub binding failed");

    let _expiry_loop = spawn_expiry_loop(orchestrator.clone(), expiries);

    let resumed = orchestrator
        .resume_in_flight()
        .await
        .expect("startup recovery failed");
    tracing::info!(resumed, "startup recovery finished");

    // 6. Ops HTTP surface
    let state = Arc::new(service::routes::sagas::AppState { store });
    let app = service::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting orchestrator service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop accepting deliveries and drain in-flight handlers.
    bus.disconnect().await.expect("bus drain failed");
    tracing::info!("server shut down gracefully");
}
