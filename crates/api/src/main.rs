use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use domain::services::{ClockZone, DeviceStore};
use persistence::repositories::{InMemoryDeviceRepository, PgDeviceRepository};
use sqlx::PgPool;
use tracing::{info, warn};

use emi_lock_api::app;
use emi_lock_api::config::{Config, StorageBackend};
use emi_lock_api::jobs::{JobScheduler, OverduePaymentsJob, PoolMetricsJob};
use emi_lock_api::middleware::init_metrics;

/// Opens the configured device store. The pool is returned for Postgres so
/// pool metrics can be scheduled.
async fn open_store(config: &Config) -> Result<(Arc<dyn DeviceStore>, Option<PgPool>)> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let db_config: persistence::db::DatabaseConfig = (&config.database).into();
            let pool = persistence::db::create_pool(&db_config)
                .await
                .context("Failed to connect to database")?;

            info!("Running database migrations...");
            persistence::db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Migrations completed");

            let store = PgDeviceRepository::new(pool.clone());
            Ok((Arc::new(store), Some(pool)))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory device store; data is lost on restart");
            Ok((Arc::new(InMemoryDeviceRepository::new()), None))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    shared::logging::init_logging(&config.logging.level, &config.logging.format);

    info!("Starting EMI lock server v{}", env!("CARGO_PKG_VERSION"));

    init_metrics().context("Failed to install metrics recorder")?;

    let (store, pool) = open_store(&config).await?;

    let mut scheduler = JobScheduler::new();
    if config.scheduler.enabled {
        let zone = ClockZone::from_offset_minutes(config.scheduler.utc_offset_minutes)
            .map_err(anyhow::Error::msg)?;
        scheduler.register(OverduePaymentsJob::new(
            Arc::clone(&store),
            zone,
            config.scheduler.overdue_interval_secs,
        ));
    } else {
        warn!("Overdue payment scheduler disabled");
    }
    if let Some(pool) = pool {
        scheduler.register(PoolMetricsJob::new(pool));
    }
    scheduler.start();

    let addr = config.socket_addr()?;
    let app = app::create_app(config, store);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Server stopped");

    Ok(())
}
