//! Queue execution (pull mode).
//!
//! The first visit records a `queued` NodeRun and enqueues a QueueItem
//! whose payload carries the run id; the task then suspends. When the
//! scheduler re-enters the node after an async worker completed the item,
//! the finalized run is found by `(node_key, branch_id)` and its stored
//! output stands in for a live execution.

use serde_json::json;

use super::executor::{ExecInput, ExecOutcome};
use super::Engine;
use crate::error::ExecError;
use crate::store::{gen_id, RunStatus};

impl Engine {
    pub(crate) async fn exec_queue(&self, exec: &ExecInput<'_>) -> Result<ExecOutcome, ExecError> {
        let runs = self
            .store()
            .list_node_runs(&exec.task.id)
            .await
            .map_err(|e| ExecError::Failed(format!("queue run lookup failed: {e}")))?;
        let last = runs
            .iter()
            .rev()
            .find(|r| r.node_key == exec.node_key && r.branch_id == exec.branch_id);

        if let Some(run) = last {
            match run.status {
                RunStatus::Ok => {
                    let result = serde_json::from_str(&run.exec_output_json).map_err(|_| {
                        ExecError::Failed("stored queue result not decodable".into())
                    })?;
                    return Ok(ExecOutcome {
                        result,
                        worker_id: run.worker_id.clone(),
                        worker_url: "queue".into(),
                        log_path: run.log_path.clone(),
                        skip_record: true,
                    });
                }
                RunStatus::Error => {
                    let msg = if run.error_text.is_empty() {
                        "queue execution failed".to_string()
                    } else {
                        run.error_text.clone()
                    };
                    return Err(ExecError::Replayed(msg));
                }
                // Work is already outstanding; do not enqueue twice.
                RunStatus::Queued | RunStatus::Running => return Err(ExecError::Pending),
                RunStatus::Canceled => {}
            }
        }

        let run_id = gen_id("run");
        let mut run = self.new_run(exec.task, exec.node_key);
        run.id = run_id.clone();
        run.status = RunStatus::Queued;
        run.branch_id = exec.branch_id.to_string();
        run.prep_json = json!({ "input_key": exec.node.prep.input_key }).to_string();
        run.exec_input_json = exec.input.to_string();
        run.finished_at = 0;
        run.worker_id = "queue".into();
        run.worker_url = "queue".into();
        if let Err(e) = self.store().save_node_run(&run).await {
            return Err(ExecError::Failed(format!("queued run not recorded: {e}")));
        }

        let payload = json!({
            "input": exec.input,
            "params": exec.params,
            "run_id": run_id,
        });
        self.store()
            .enqueue_work(
                &exec.task.id,
                exec.node_key,
                &exec.node.service,
                &payload.to_string(),
            )
            .await
            .map_err(|e| ExecError::Failed(format!("enqueue failed: {e}")))?;
        tracing::info!(
            task = %exec.task.id,
            node = %exec.node_key,
            branch = %exec.branch_id,
            service = %exec.node.service,
            run = %run_id,
            "work enqueued"
        );
        Err(ExecError::Pending)
    }
}
