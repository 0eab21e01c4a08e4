use cablebill::config::{Config, StorageBackend};
use cablebill::domain::clock::SystemClock;
use cablebill::domain::ledger::BillingStore;
use cablebill::infrastructure::persistence::MemoryBillingStore;
use cablebill::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use cablebill::infrastructure::persistence::{create_pool, run_migrations, DatabaseConfig, PgBillingStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting cablebill");

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config.storage);

    let store = open_store(&config).await?;
    let calendar = config.billing.calendar()?;
    info!("Billing months follow UTC offset {}", calendar.offset());

    let state = AppState::new(
        store,
        Arc::new(SystemClock),
        calendar,
        config.billing.id_scheme.generator(),
        config.billing.max_transaction_attempts,
    );

    // Initialize metrics exporter
    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics()?;

    let app = build_router(state, prometheus_handle);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("REST API server started on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn BillingStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryBillingStore::new()))
        }
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            info!("Initializing database connection...");
            let pool = create_pool(&DatabaseConfig::from(&config.database)).await?;
            run_migrations(&pool).await?;
            Ok(Arc::new(PgBillingStore::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres => {
            anyhow::bail!("storage.backend = \"postgres\" requires the `postgres` feature")
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
