//! Persisted record types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::StoreError;

/// Task lifecycle: `pending → running ↔ waiting_queue → completed | failed
/// | canceled`, with `canceling` as an externally-set intent honored at the
/// next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    WaitingQueue,
    Canceling,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::WaitingQueue => "waiting_queue",
            TaskStatus::Canceling => "canceling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "waiting_queue" => Ok(TaskStatus::WaitingQueue),
            "canceling" => Ok(TaskStatus::Canceling),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(StoreError::Corrupt(format!("task status: {other}"))),
        }
    }
}

/// Status of one recorded node attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error,
    Canceled,
    Queued,
    Running,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
            RunStatus::Canceled => "canceled",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
        }
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(RunStatus::Ok),
            "error" => Ok(RunStatus::Error),
            "canceled" => Ok(RunStatus::Canceled),
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            other => Err(StoreError::Corrupt(format!("run status: {other}"))),
        }
    }
}

/// Queue item lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Claimed => "claimed",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "claimed" => Ok(QueueStatus::Claimed),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(StoreError::Corrupt(format!("queue status: {other}"))),
        }
    }
}

/// Immutable logical identity of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
}

/// One published (or draft) revision of a flow's definition. Tasks pin to
/// exactly one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: String,
    pub flow_id: String,
    pub version: i64,
    pub definition_json: String,
    pub status: String,
}

/// The mutable execution record of one flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub flow_version_id: String,
    pub status: TaskStatus,
    pub params_json: String,
    pub shared_json: String,
    pub current_node_key: String,
    pub last_action: String,
    pub step_count: i64,
    pub lease_owner: String,
    pub lease_expiry: i64,
    pub request_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Append-only record of one node attempt. Multi-branch nodes record each
/// branch under a distinct `branch_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    /// Empty on insert; the store assigns a fresh prefixed id. Queue
    /// executions pre-assign it so the async completion can address the
    /// run directly.
    pub id: String,
    pub task_id: String,
    pub node_key: String,
    pub attempt_no: i64,
    pub status: RunStatus,
    pub sub_status: String,
    pub branch_id: String,
    pub prep_json: String,
    pub exec_input_json: String,
    pub exec_output_json: String,
    pub error_text: String,
    pub action: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub worker_id: String,
    pub worker_url: String,
    pub log_path: String,
}

/// A registered worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub url: String,
    pub services: Vec<String>,
    pub load: i64,
    pub last_heartbeat: i64,
    pub status: String,
    /// `http` (direct dispatch), `async` (queue poller), or `local`.
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// A persisted unit of queue work bridging a `queue` executor to an async
/// worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub task_id: String,
    pub node_key: String,
    pub service: String,
    pub input_json: String,
    pub status: QueueStatus,
    pub worker_id: String,
    pub created_at: i64,
    pub started_at: i64,
    pub timeout_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::WaitingQueue,
            TaskStatus::Canceling,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Canceled,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(!TaskStatus::WaitingQueue.is_terminal());
        assert!(!TaskStatus::Canceling.is_terminal());
    }
}
