//! In-process async queue worker.
//!
//! Drives the worker side of the queue protocol against the store:
//! register with `type = async`, heartbeat, poll for claimed items,
//! execute the matching handler, and report completion with the `run_id`
//! threaded through the item payload. Handlers reuse the [`LocalFunc`]
//! trait, so the same functions can serve local executors and queue
//! services.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{complete_queue_work, fail_queue_work, poll_queue_work, run_id_of};
use crate::engine::LocalFunc;
use crate::error::StoreError;
use crate::store::{QueueStatus, SqliteStore, WorkerInfo};

const IDLE_SLEEP: Duration = Duration::from_secs(1);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(5);

/// A queue worker bound to one store.
pub struct QueueWorker {
    store: Arc<SqliteStore>,
    id: String,
    handlers: HashMap<String, Arc<dyn LocalFunc>>,
}

impl QueueWorker {
    pub fn new(store: Arc<SqliteStore>, id: impl Into<String>) -> Self {
        QueueWorker {
            store,
            id: id.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `service`. The advertised service set is the
    /// handler key set.
    pub fn handle(&mut self, service: &str, func: Arc<dyn LocalFunc>) -> &mut Self {
        self.handlers.insert(service.to_string(), func);
        self
    }

    pub fn services(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Announce this worker to the registry as an async poller.
    pub async fn register(&self) -> Result<(), StoreError> {
        self.store
            .register_worker(&WorkerInfo {
                id: self.id.clone(),
                url: "queue".into(),
                services: self.services(),
                load: 0,
                last_heartbeat: 0,
                status: "online".into(),
                kind: "async".into(),
            })
            .await
    }

    /// Claim and process at most one queue item. Returns whether an item
    /// was handled.
    pub async fn poll_once(&self) -> Result<bool, StoreError> {
        let services = self.services();
        let Some(item) = poll_queue_work(&self.store, &self.id, &services).await? else {
            return Ok(false);
        };
        tracing::info!(worker = %self.id, queue = %item.id, service = %item.service, "queue item claimed");

        let Some(run_id) = run_id_of(&item) else {
            // Without a run id there is no NodeRun to finalize and no safe
            // way to resume the task; drop the item as failed.
            tracing::warn!(worker = %self.id, queue = %item.id, "queue item carries no run id");
            self.store
                .settle_queue_item(&item.id, QueueStatus::Failed)
                .await?;
            return Ok(true);
        };

        let payload: Value = serde_json::from_str(&item.input_json).unwrap_or(Value::Null);
        let input = payload.get("input").cloned().unwrap_or(Value::Null);
        let params: Map<String, Value> = payload
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let outcome = match self.handlers.get(&item.service) {
            Some(func) => func.call(input, &params).await,
            None => Err(format!("unknown service: {}", item.service)),
        };
        match outcome {
            Ok(result) => {
                complete_queue_work(&self.store, &item.id, &run_id, &result, "", &self.id).await?;
            }
            Err(e) => {
                fail_queue_work(&self.store, &item.id, &run_id, &e, "", &self.id).await?;
            }
        }
        Ok(true)
    }

    /// Register, then poll forever, heartbeating between claims.
    pub async fn run(self) {
        if let Err(e) = self.register().await {
            tracing::warn!(worker = %self.id, error = %e, "worker registration failed");
        }
        let mut last_heartbeat = tokio::time::Instant::now();
        loop {
            if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
                if let Err(e) = self.store.heartbeat_worker(&self.id, "queue", 0).await {
                    tracing::warn!(worker = %self.id, error = %e, "heartbeat failed");
                }
                last_heartbeat = tokio::time::Instant::now();
            }
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_SLEEP).await,
                Err(e) => {
                    tracing::warn!(worker = %self.id, error = %e, "poll failed");
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        }
    }
}
