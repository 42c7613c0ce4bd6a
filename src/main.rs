//! Scheduler daemon: worker liveness sweeping plus the lease-driving loop.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use duraflow::{Engine, Scheduler, Settings, SqliteStore, WorkerRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    tracing::info!(db = %settings.db_path, owner = %settings.owner, "starting scheduler");

    let store = Arc::new(SqliteStore::open(&settings.db_path).await?);
    let registry = WorkerRegistry::new(store.clone(), settings.worker_offline_ttl_secs);
    tokio::spawn(
        registry
            .clone()
            .run_sweeper(Duration::from_secs(settings.worker_refresh_secs as u64)),
    );

    let engine = Arc::new(
        Engine::new(store.clone())
            .with_owner(settings.owner.clone())
            .with_worker_registry(registry)
            .with_log_dir(settings.log_dir.clone()),
    );
    let scheduler = Scheduler::new(store, engine, settings.lease_ttl_secs);
    scheduler.run().await;
    Ok(())
}
