//! The executor dispatcher: one atomic unit of work, routed by the node's
//! `exec_type`.

use serde_json::{Map, Value};

use super::Engine;
use crate::error::ExecError;
use crate::model::DefNode;
use crate::store::Task;

/// Input to one execution unit. `branch_id` identifies the parallel /
/// foreach / subflow branch on whose behalf the unit runs; queue
/// executions persist it so resumption can address the right branch.
pub struct ExecInput<'a> {
    pub task: &'a Task,
    pub node: &'a DefNode,
    pub node_key: &'a str,
    pub branch_id: &'a str,
    pub input: &'a Value,
    pub params: &'a Map<String, Value>,
}

/// Result of one execution unit.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub result: Value,
    pub worker_id: String,
    pub worker_url: String,
    pub log_path: String,
    /// Set when the result was reconstituted from an already-recorded
    /// queue run; the caller must not log a second NodeRun for it.
    pub skip_record: bool,
}

impl Engine {
    /// Run one unit of work for `input.node`. Dispatches on `exec_type`;
    /// empty means `http`.
    pub(crate) async fn exec_unit(&self, input: ExecInput<'_>) -> Result<ExecOutcome, ExecError> {
        match input.node.exec_type.as_str() {
            "" | "http" => self.exec_http(&input).await,
            "local_func" => self.exec_local_func(&input).await,
            "local_script" => self.exec_local_script(&input).await,
            "queue" => self.exec_queue(&input).await,
            other => Err(ExecError::Fatal(format!("unsupported exec type: {other}"))),
        }
    }
}
