//! Durable, persistent workflow scheduling.
//!
//! Directed graphs of heterogeneous nodes (HTTP services, in-process
//! functions, local scripts, nested sub-flows, timers, waits, approvals)
//! execute one leased step at a time against a SQLite store, surviving
//! scheduler crashes, worker failures, and long asynchronous suspensions.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod workers;

pub use crate::config::Settings;
pub use crate::engine::{Engine, LocalFunc, NodeRunner, NodeRunnerRegistry, StepContext};
pub use crate::error::{EngineError, ExecError, StoreError};
pub use crate::model::{find_next, ChoiceCase, DefEdge, DefNode, EmbeddedFlow, ExecSpec, FlowDef, NodeKind};
pub use crate::scheduler::Scheduler;
pub use crate::store::{
    Flow, FlowVersion, NodeRun, QueueItem, QueueStatus, RunStatus, SqliteStore, Task, TaskStatus,
    WorkerInfo,
};
pub use crate::workers::WorkerRegistry;
