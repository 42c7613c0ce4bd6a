//! Choice node runner: pure routing, no external execution.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::{Engine, NodeRunner, StepContext};
use crate::error::EngineError;
use crate::model::pick_action;
use crate::resolver::eval_expr;

pub struct ChoiceRunner;

#[async_trait]
impl NodeRunner for ChoiceRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let mut action = String::new();
        let mut matched = false;
        // Declared order; the first true case wins outright, even when its
        // action is empty. The fallback chain applies only when every case
        // missed.
        for case in &step.node.choice_cases {
            if eval_expr(&case.expr, &step.shared, &step.params, &step.input) {
                action = case.action.clone();
                matched = true;
                break;
            }
        }
        if !matched {
            if !step.node.post.action_static.is_empty() {
                action = step.node.post.action_static.clone();
            } else if !step.node.post.action_key.is_empty() {
                if !step.input.is_null() {
                    action = pick_action(&step.input, &step.node.post.action_key);
                }
                if action.is_empty() {
                    action = pick_action(
                        &Value::Object(step.shared.clone()),
                        &step.node.post.action_key,
                    );
                }
                if action.is_empty() && !step.node.default_action.is_empty() {
                    action = step.node.default_action.clone();
                }
            } else if !step.node.default_action.is_empty() {
                action = step.node.default_action.clone();
            }
        }

        if !step.node.post.output_key.is_empty() {
            step.shared
                .insert(step.node.post.output_key.clone(), step.input.clone());
        }

        tracing::info!(task = %step.task.id, node = %step.node_key, action = %action, "choice decided");
        let mut run = engine.new_run(&step.task, &step.node_key);
        run.prep_json = json!({"input_key": step.node.prep.input_key}).to_string();
        run.exec_input_json = step.input.to_string();
        run.action = action.clone();
        engine.record_run(run).await;

        engine
            .finish_node(
                &step.task,
                &step.def,
                &step.node_key,
                &action,
                &step.shared,
                step.task.step_count + 1,
                None,
            )
            .await
    }
}
