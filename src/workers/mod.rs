//! Worker registry: registration, heartbeats, liveness sweeping, and
//! candidate selection for dispatch.
//!
//! Workers are shared state, but the mutation pattern keeps them safe
//! without locks: heartbeats only advance `last_heartbeat`, and the TTL
//! sweep is idempotent.

use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{SqliteStore, WorkerInfo};

/// Store-backed worker registry.
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<SqliteStore>,
    /// Heartbeats older than this are considered dead.
    offline_ttl_secs: i64,
}

impl WorkerRegistry {
    pub fn new(store: Arc<SqliteStore>, offline_ttl_secs: i64) -> Self {
        WorkerRegistry {
            store,
            offline_ttl_secs,
        }
    }

    /// Upsert a worker by id.
    pub async fn register(&self, worker: &WorkerInfo) -> Result<(), StoreError> {
        self.store.register_worker(worker).await
    }

    /// Record a heartbeat, marking the worker online.
    pub async fn heartbeat(&self, id: &str, url: &str, load: i64) -> Result<(), StoreError> {
        self.store.heartbeat_worker(id, url, load).await
    }

    /// Mark stale workers offline.
    pub async fn sweep(&self) -> Result<(), StoreError> {
        self.store.refresh_workers_status(self.offline_ttl_secs).await
    }

    /// Live HTTP workers advertising `service`, optionally sorted ascending
    /// by load (stable, so insertion order breaks ties).
    pub async fn candidates(
        &self,
        service: &str,
        weighted_by_load: bool,
    ) -> Result<Vec<WorkerInfo>, StoreError> {
        let mut workers = self
            .store
            .list_workers(service, self.offline_ttl_secs, true)
            .await?;
        if weighted_by_load {
            workers.sort_by_key(|w| w.load);
        }
        Ok(workers)
    }

    /// Background sweep loop for the scheduler process.
    pub async fn run_sweeper(self, interval: Duration) {
        loop {
            if let Err(e) = self.sweep().await {
                tracing::warn!(error = %e, "worker status sweep failed");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> (tempfile::TempDir, WorkerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.db");
        let store = Arc::new(SqliteStore::open(path.to_str().unwrap()).await.unwrap());
        (dir, WorkerRegistry::new(store, 15))
    }

    fn worker(id: &str, load: i64) -> WorkerInfo {
        WorkerInfo {
            id: id.into(),
            url: format!("http://{id}"),
            services: vec!["transform".into()],
            load,
            last_heartbeat: 0,
            status: "online".into(),
            kind: "http".into(),
        }
    }

    #[tokio::test]
    async fn test_candidates_sorted_by_load_when_weighted() {
        let (_dir, reg) = registry().await;
        reg.register(&worker("w-busy", 10)).await.unwrap();
        reg.register(&worker("w-idle", 0)).await.unwrap();

        let unweighted = reg.candidates("transform", false).await.unwrap();
        assert_eq!(unweighted[0].id, "w-busy");

        let weighted = reg.candidates("transform", true).await.unwrap();
        assert_eq!(weighted[0].id, "w-idle");
        assert_eq!(weighted[1].id, "w-busy");
    }

    #[tokio::test]
    async fn test_load_tie_breaks_on_insertion_order() {
        let (_dir, reg) = registry().await;
        reg.register(&worker("w-first", 2)).await.unwrap();
        reg.register(&worker("w-second", 2)).await.unwrap();
        let weighted = reg.candidates("transform", true).await.unwrap();
        assert_eq!(weighted[0].id, "w-first");
    }

    #[tokio::test]
    async fn test_heartbeat_brings_worker_back_online() {
        let (_dir, reg) = registry().await;
        let mut w = worker("w1", 0);
        w.status = "offline".into();
        reg.register(&w).await.unwrap();
        reg.heartbeat("w1", "", 4).await.unwrap();
        let cands = reg.candidates("transform", false).await.unwrap();
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].status, "online");
        assert_eq!(cands[0].load, 4);
    }
}
