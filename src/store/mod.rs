//! Durable record of flows, versions, tasks, node runs, workers, and queue
//! items.
//!
//! The store is the only shared mutable resource in the system; the
//! ownership invariants of the task lifecycle are enforced here with
//! conditional updates rather than with any cross-process lock.

mod sqlite;
mod types;

pub use sqlite::{gen_id, SqliteStore};
pub use types::{
    Flow, FlowVersion, NodeRun, QueueItem, QueueStatus, RunStatus, Task, TaskStatus, WorkerInfo,
};
