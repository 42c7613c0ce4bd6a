//! Executor node runner: dispatch one unit of work with the node's outer
//! retry policy, then map its result through the post spec.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::apply_outputs;
use crate::engine::{Engine, ExecInput, NodeRunner, StepContext};
use crate::error::{EngineError, ExecError};
use crate::model::pick_action;
use crate::store::{RunStatus, TaskStatus};

pub struct ExecutorRunner;

#[async_trait]
impl NodeRunner for ExecutorRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let mut attempts: i64 = 0;
        loop {
            attempts += 1;
            let exec = engine
                .exec_unit(ExecInput {
                    task: &step.task,
                    node: &step.node,
                    node_key: &step.node_key,
                    branch_id: "",
                    input: &step.input,
                    params: &step.params,
                })
                .await;

            match exec {
                Ok(out) => {
                    tracing::info!(
                        task = %step.task.id,
                        node = %step.node_key,
                        attempt = attempts,
                        worker = %out.worker_id,
                        "executor ok"
                    );
                    if !out.skip_record {
                        let mut run = engine.new_run(&step.task, &step.node_key);
                        run.attempt_no = attempts;
                        run.prep_json =
                            json!({"input_key": step.node.prep.input_key}).to_string();
                        run.exec_input_json = step.input.to_string();
                        run.exec_output_json = out.result.to_string();
                        run.worker_id = out.worker_id.clone();
                        run.worker_url = out.worker_url.clone();
                        run.log_path = out.log_path.clone();
                        engine.record_run(run).await;
                    }
                    apply_outputs(&step.node.post, &out.result, &mut step.shared);
                    let action = if !step.node.post.action_static.is_empty() {
                        step.node.post.action_static.clone()
                    } else if !step.node.post.action_key.is_empty() {
                        pick_action(&out.result, &step.node.post.action_key)
                    } else {
                        String::new()
                    };
                    return engine
                        .finish_node(
                            &step.task,
                            &step.def,
                            &step.node_key,
                            &action,
                            &step.shared,
                            step.task.step_count + 1,
                            None,
                        )
                        .await;
                }
                Err(ExecError::Pending) => {
                    // The queued NodeRun is already recorded; just park the
                    // task until the async completion flips it back.
                    return engine
                        .suspend_task(&step.task, TaskStatus::WaitingQueue, &step.shared)
                        .await;
                }
                Err(ExecError::Replayed(msg)) => {
                    // Terminal error already on record from the queue path.
                    return engine
                        .finish_node(
                            &step.task,
                            &step.def,
                            &step.node_key,
                            "",
                            &step.shared,
                            step.task.step_count + 1,
                            Some(&msg),
                        )
                        .await;
                }
                Err(err) => {
                    let fatal = matches!(err, ExecError::Fatal(_));
                    let msg = err.to_string();
                    tracing::info!(
                        task = %step.task.id,
                        node = %step.node_key,
                        attempt = attempts,
                        error = %msg,
                        fatal,
                        "executor attempt failed"
                    );
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.attempt_no = attempts;
                    run.status = RunStatus::Error;
                    run.prep_json = json!({"input_key": step.node.prep.input_key}).to_string();
                    run.exec_input_json = step.input.to_string();
                    run.error_text = msg.clone();
                    engine.record_run(run).await;

                    if fatal || attempts > step.node.max_retries {
                        return engine
                            .finish_node(
                                &step.task,
                                &step.def,
                                &step.node_key,
                                "",
                                &step.shared,
                                step.task.step_count + 1,
                                Some(&msg),
                            )
                            .await;
                    }
                    if step.node.wait_millis > 0 {
                        tokio::time::sleep(Duration::from_millis(step.node.wait_millis as u64))
                            .await;
                    }
                }
            }
        }
    }
}
