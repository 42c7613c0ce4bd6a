//! The lease-driving scheduler loop.
//!
//! Any number of scheduler processes may run against one store; the lease
//! claim plus conditional updates guarantee at most one active executor
//! per task. Within a process, a claimed task is stepped sequentially
//! until it terminates or suspends, renewing the lease before every step.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::StoreError;
use crate::store::{SqliteStore, TaskStatus};

/// Pause between claim attempts when nothing is runnable.
const IDLE_BACKOFF: Duration = Duration::from_millis(300);
/// Pause between steps of one task, letting timers and waits breathe.
const STEP_PAUSE: Duration = Duration::from_millis(100);

pub struct Scheduler {
    store: Arc<SqliteStore>,
    engine: Arc<Engine>,
    owner: String,
    lease_ttl_secs: i64,
}

impl Scheduler {
    pub fn new(store: Arc<SqliteStore>, engine: Arc<Engine>, lease_ttl_secs: i64) -> Self {
        let owner = engine.owner().to_string();
        Scheduler {
            store,
            engine,
            owner,
            lease_ttl_secs,
        }
    }

    /// Claim-and-drive forever.
    pub async fn run(&self) {
        tracing::info!(owner = %self.owner, ttl = self.lease_ttl_secs, "scheduler loop started");
        loop {
            match self
                .store
                .lease_next_task(&self.owner, self.lease_ttl_secs)
                .await
            {
                Ok(Some(task)) => {
                    self.drive_task(&task.id).await;
                }
                Ok(None) => {
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
                Err(StoreError::LeaseConflict) => {
                    // Lost the claim race to a peer; try again shortly.
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "lease attempt failed");
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
            }
        }
    }

    /// Step one leased task until it terminates, suspends, or errors.
    pub async fn drive_task(&self, task_id: &str) {
        loop {
            if let Err(e) = self
                .store
                .extend_lease(task_id, &self.owner, self.lease_ttl_secs)
                .await
            {
                tracing::warn!(task = %task_id, error = %e, "lease extension failed");
                return;
            }
            if let Err(e) = self.engine.run_once(task_id).await {
                if e.is_lease_error() {
                    // Another scheduler owns the task now; writing anything
                    // here would stomp its progress.
                    tracing::info!(task = %task_id, error = %e, "dropping task to its new owner");
                    return;
                }
                tracing::warn!(task = %task_id, error = %e, "step failed, marking task failed");
                if let Err(e) = self.store.update_task_status(task_id, TaskStatus::Failed).await {
                    tracing::warn!(task = %task_id, error = %e, "failure status not persisted");
                }
                return;
            }
            let task = match self.store.get_task(task_id).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(task = %task_id, error = %e, "task re-read failed");
                    return;
                }
            };
            if task.status.is_terminal()
                || task.status == TaskStatus::WaitingQueue
                || task.current_node_key.is_empty()
            {
                return;
            }
            tokio::time::sleep(STEP_PAUSE).await;
        }
    }
}
