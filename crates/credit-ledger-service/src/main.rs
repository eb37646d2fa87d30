//! Credit Ledger Service - HTTP API for credits, paid services and purchases.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_ledger_service::ledger::spawn_reservation_sweeper;
use credit_ledger_service::{create_router, AppState, ServiceConfig, StorageBackend};
use credit_ledger_store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Credit Ledger Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        storage_backend = ?config.storage_backend,
        data_dir = %config.data_dir,
        auth_configured = %config.auth_jwt_secret.is_some(),
        inference_configured = %config.inference_api_url.is_some(),
        gateway_configured = %config.payment_gateway_url.is_some(),
        webhook_secret_configured = %config.payment_webhook_secret.is_some(),
        packages = config.packages.packages.len(),
        "Service configuration loaded"
    );

    let store = open_store(&config)?;

    let state = AppState::new(store, config.clone());

    let sweep_every = Duration::from_secs(config.reservation_sweep_interval_seconds.max(1));
    spawn_reservation_sweeper(state.charger.clone(), sweep_every);
    tracing::info!(interval_seconds = sweep_every.as_secs(), "Reservation sweeper started");

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store - balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackend::RocksDb => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            Ok(Arc::new(credit_ledger_store::RocksStore::open(&config.data_dir)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackend::RocksDb => Err(
            "STORAGE_BACKEND=rocksdb requires building with the rocksdb-backend feature".into(),
        ),
    }
}
