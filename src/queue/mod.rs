//! The queue bridge between suspended tasks and async workers.
//!
//! Protocol: an async worker polls for one claimed item, executes it, and
//! reports completion with the `run_id` it found in the item payload. The
//! completion finalizes the outstanding NodeRun in place and flips the
//! task back to `pending`; the next scheduler pass re-enters the node,
//! finds the finalized run, and proceeds without re-executing.

mod worker;

pub use worker::QueueWorker;

use serde_json::Value;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{QueueItem, QueueStatus, RunStatus, SqliteStore, TaskStatus};

/// How long a claimed item stays invisible to other pollers.
pub const VISIBILITY_TIMEOUT_SECS: i64 = 60;

/// Claim one unit of queue work for a worker advertising `services`.
pub async fn poll_queue_work(
    store: &Arc<SqliteStore>,
    worker_id: &str,
    services: &[String],
) -> Result<Option<QueueItem>, StoreError> {
    store
        .poll_queue(worker_id, services, VISIBILITY_TIMEOUT_SECS)
        .await
}

/// Report a successful queue execution and resume the owning task.
pub async fn complete_queue_work(
    store: &Arc<SqliteStore>,
    queue_id: &str,
    run_id: &str,
    result: &Value,
    log_path: &str,
    worker_id: &str,
) -> Result<String, StoreError> {
    let task_id = store.settle_queue_item(queue_id, QueueStatus::Completed).await?;
    store
        .finish_node_run(run_id, RunStatus::Ok, &result.to_string(), "", log_path, worker_id)
        .await?;
    // The task sits in waiting_queue with no live owner, so the unowned
    // write is the correct one here.
    store.update_task_status(&task_id, TaskStatus::Pending).await?;
    tracing::info!(task = %task_id, queue = %queue_id, run = %run_id, "queue work completed, task resumed");
    Ok(task_id)
}

/// Report a failed queue execution; the resumed task surfaces the stored
/// error on its next step.
pub async fn fail_queue_work(
    store: &Arc<SqliteStore>,
    queue_id: &str,
    run_id: &str,
    error: &str,
    log_path: &str,
    worker_id: &str,
) -> Result<String, StoreError> {
    let task_id = store.settle_queue_item(queue_id, QueueStatus::Failed).await?;
    store
        .finish_node_run(run_id, RunStatus::Error, "null", error, log_path, worker_id)
        .await?;
    store.update_task_status(&task_id, TaskStatus::Pending).await?;
    tracing::info!(task = %task_id, queue = %queue_id, run = %run_id, error = %error, "queue work failed, task resumed");
    Ok(task_id)
}

/// The `run_id` an enqueueing executor threaded through the item payload.
pub fn run_id_of(item: &QueueItem) -> Option<String> {
    let payload: Value = serde_json::from_str(&item.input_json).ok()?;
    payload
        .get("run_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_id_of_payload() {
        let item = QueueItem {
            id: "q-1".into(),
            task_id: "t".into(),
            node_key: "n".into(),
            service: "s".into(),
            input_json: json!({"input": 1, "params": {}, "run_id": "run-abc"}).to_string(),
            status: QueueStatus::Claimed,
            worker_id: "w".into(),
            created_at: 0,
            started_at: 0,
            timeout_at: 0,
        };
        assert_eq!(run_id_of(&item).as_deref(), Some("run-abc"));

        let mut bare = item;
        bare.input_json = "{}".into();
        assert_eq!(run_id_of(&bare), None);
    }
}
