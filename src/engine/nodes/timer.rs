//! Timer node runner: cooperative delay.
//!
//! The first visit records the start time under `_rt["tm:<node>"]` and
//! yields; later visits compare elapsed time against `params.delay_ms`.
//! No thread ever blocks on the delay: the scheduler loop polls, and any
//! scheduler can pick the task up after a crash.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::clock::now_millis;
use crate::engine::{rt_clear, rt_load, rt_store, Engine, NodeRunner, StepContext};
use crate::error::EngineError;

pub struct TimerRunner;

#[async_trait]
impl NodeRunner for TimerRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let key = format!("tm:{}", step.node_key);
        let now = now_millis();

        let Some(state) = rt_load(&step.shared, &key) else {
            let state = json!({"start": now}).as_object().cloned().unwrap_or_default();
            rt_store(&mut step.shared, &key, state);
            return engine
                .checkpoint_running(
                    &step.task,
                    &step.node_key,
                    &step.shared,
                    step.task.step_count + 1,
                )
                .await;
        };

        let delay = step
            .params
            .get("delay_ms")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as i64;
        let start = state.get("start").and_then(Value::as_f64).unwrap_or(0.0) as i64;

        if delay <= 0 || now - start >= delay {
            let action = step.node.post.action_static.clone();
            if !step.node.post.output_key.is_empty() {
                step.shared
                    .insert(step.node.post.output_key.clone(), step.input.clone());
            }
            rt_clear(&mut step.shared, &key);
            tracing::info!(task = %step.task.id, node = %step.node_key, delay_ms = delay, "timer fired");
            let mut run = engine.new_run(&step.task, &step.node_key);
            run.prep_json = json!({"delay_ms": delay}).to_string();
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

        // Still waiting: re-checkpoint without moving the cursor.
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
