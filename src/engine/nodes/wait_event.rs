//! Wait-event node runner: cooperative wait on an external signal.
//!
//! Each visit resolves `params.signal_key`; a truthy value takes the
//! signal path. With `timeout_ms` set, an elapsed wait applies the failure
//! strategy: `retry` resets the clock, `continue` finalizes as success,
//! anything else finalizes with a timeout error.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::clock::now_millis;
use crate::engine::{rt_clear, rt_load, rt_store, Engine, NodeRunner, StepContext};
use crate::error::EngineError;
use crate::model::pick_action;
use crate::store::RunStatus;

pub struct WaitEventRunner;

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false)) && v.as_str() != Some("")
}

#[async_trait]
impl NodeRunner for WaitEventRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let key = format!("we:{}", step.node_key);
        let mut state = rt_load(&step.shared, &key).unwrap_or_else(|| {
            json!({"start": now_millis()})
                .as_object()
                .cloned()
                .unwrap_or_default()
        });

        let signal_key = step
            .params
            .get("signal_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let signal =
            crate::resolver::resolve_ref(&signal_key, &step.shared, &step.params, &step.input);
        let timeout = step
            .params
            .get("timeout_ms")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as i64;

        if truthy(&signal) {
            let mut action = step.node.post.action_static.clone();
            if action.is_empty() && !step.node.post.action_key.is_empty() {
                action = pick_action(&json!({"signal": signal}), &step.node.post.action_key);
            }
            if !step.node.post.output_key.is_empty() {
                step.shared
                    .insert(step.node.post.output_key.clone(), signal.clone());
            }
            rt_clear(&mut step.shared, &key);
            tracing::info!(task = %step.task.id, node = %step.node_key, action = %action, "signal received");
            let mut run = engine.new_run(&step.task, &step.node_key);
            run.prep_json = json!({"signal_key": signal_key}).to_string();
            run.exec_input_json = step.input.to_string();
            run.exec_output_json = signal.to_string();
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

        let start = state.get("start").and_then(Value::as_f64).unwrap_or(0.0) as i64;
        if timeout > 0 && now_millis() - start >= timeout {
            match step.node.failure_strategy.as_str() {
                "retry" => {
                    state.insert("start".into(), json!(now_millis()));
                    rt_store(&mut step.shared, &key, state);
                    return engine
                        .checkpoint_running(
                            &step.task,
                            &step.node_key,
                            &step.shared,
                            step.task.step_count + 1,
                        )
                        .await;
                }
                "continue" => {
                    let action = step.node.post.action_static.clone();
                    rt_clear(&mut step.shared, &key);
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.prep_json = json!({"signal_key": signal_key}).to_string();
                    run.exec_input_json = step.input.to_string();
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
                _ => {
                    let action = step.node.post.action_static.clone();
                    rt_clear(&mut step.shared, &key);
                    tracing::info!(task = %step.task.id, node = %step.node_key, "wait timed out");
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.status = RunStatus::Error;
                    run.prep_json = json!({"signal_key": signal_key}).to_string();
                    run.exec_input_json = step.input.to_string();
                    run.error_text = "timeout".into();
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
                            Some("timeout"),
                        )
                        .await;
                }
            }
        }

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
