//! Approval node runner: wait for a human decision.
//!
//! A wait-event specialized for decisions: the resolved value under
//! `params.approval_key` chooses the action. A bool maps to
//! `approved`/`rejected`, a string is the action itself, and
//! `post.action_key` overrides both. Until a value appears the task
//! re-checkpoints in place.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::{rt_clear, rt_load, rt_store, Engine, NodeRunner, StepContext};
use crate::error::EngineError;
use crate::model::pick_action;

pub struct ApprovalRunner;

#[async_trait]
impl NodeRunner for ApprovalRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let key = format!("ap:{}", step.node_key);
        let state = rt_load(&step.shared, &key).unwrap_or_default();

        let approval_key = step
            .params
            .get("approval_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let value =
            crate::resolver::resolve_ref(&approval_key, &step.shared, &step.params, &step.input);

        let decided = !value.is_null() && value.as_str() != Some("");
        if decided {
            let mut action = step.node.post.action_static.clone();
            if !step.node.post.action_key.is_empty() {
                action = pick_action(&json!({"approval": value}), &step.node.post.action_key);
            } else {
                match &value {
                    Value::Bool(true) => action = "approved".into(),
                    Value::Bool(false) => action = "rejected".into(),
                    Value::String(s) if !s.is_empty() => action = s.clone(),
                    _ => {}
                }
            }
            if !step.node.post.output_key.is_empty() {
                step.shared
                    .insert(step.node.post.output_key.clone(), value.clone());
            }
            rt_clear(&mut step.shared, &key);
            tracing::info!(task = %step.task.id, node = %step.node_key, action = %action, "approval decided");
            let mut run = engine.new_run(&step.task, &step.node_key);
            run.prep_json = json!({"approval_key": approval_key}).to_string();
            run.exec_input_json = step.input.to_string();
            run.exec_output_json = value.to_string();
            run.action = action.clone();
            engine.record_run(run).await;
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

        // Undecided: checkpoint in place and keep waiting.
        rt_store(&mut step.shared, &key, state);
        engine
            .checkpoint_running(
                &step.task,
                &step.node_key,
                &step.shared,
                step.task.step_count + 1,
            )
            .await
    }
}
