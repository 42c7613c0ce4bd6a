//! Subflow node runner: one step of an embedded flow per visit.
//!
//! The sub-cursor, the subflow's private shared state, and the retry
//! bookkeeping live under `_rt["sf:<node>"]`, so a crash mid-subflow
//! resumes at the same sub-node. When the sub-cursor runs off the end, the
//! accumulated sub-shared state aggregates into the parent under
//! `post.output_key`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::clock::now_millis;
use crate::engine::{rt_clear, rt_load, rt_store, Engine, ExecInput, NodeRunner, StepContext};
use crate::error::{EngineError, ExecError};
use crate::model::{find_next, pick_action, DefNode};
use crate::store::{RunStatus, TaskStatus};

pub struct SubflowRunner;

#[async_trait]
impl NodeRunner for SubflowRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        // run_once routes subflow nodes here only when the embedded flow
        // is present.
        let subflow = step.node.subflow.clone().unwrap_or_default();
        let key = format!("sf:{}", step.node_key);
        let mut sf = rt_load(&step.shared, &key).unwrap_or_else(|| {
            json!({"curr": subflow.start, "shared": {}, "last": ""})
                .as_object()
                .cloned()
                .unwrap_or_default()
        });
        let curr_sub = sf
            .get("curr")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut sub_shared = sf
            .get("shared")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        // Retry backoff: wait out next_try_at before re-entering.
        if step.node.failure_strategy == "retry" {
            let next_try = sf.get("next_try_at").and_then(Value::as_f64).unwrap_or(0.0) as i64;
            if next_try > 0 && now_millis() < next_try {
                rt_store(&mut step.shared, &key, sf);
                return engine
                    .checkpoint_running(
                        &step.task,
                        &step.node_key,
                        &step.shared,
                        step.task.step_count + 1,
                    )
                    .await;
            }
        }

        if curr_sub.is_empty() {
            // Nothing left to execute (an empty embedded flow).
            let action = step.node.post.action_static.clone();
            let mut run = engine.new_run(&step.task, &step.node_key);
            run.prep_json = json!({"input_key": step.node.prep.input_key}).to_string();
            run.action = action.clone();
            engine.record_run(run).await;
            rt_clear(&mut step.shared, &key);
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

        tracing::debug!(task = %step.task.id, node = %step.node_key, sub = %curr_sub, "subflow step");
        let sub_node = subflow.nodes.get(&curr_sub).cloned();
        let (exec_result, sub_input) = match sub_node {
            Some(ref sn) => {
                let child_params = child_params(&step, sn, &curr_sub);
                let sub_input = sub_node_input(sn, &child_params, &sub_shared);
                let eff = effective_config(&step.node, &curr_sub, sn);
                let res = engine
                    .exec_unit(ExecInput {
                        task: &step.task,
                        node: &eff,
                        node_key: &step.node_key,
                        branch_id: &curr_sub,
                        input: &sub_input,
                        params: &child_params,
                    })
                    .await;
                (res, sub_input)
            }
            None => (
                Err(ExecError::Fatal(format!("sub node not found: {curr_sub}"))),
                Value::Null,
            ),
        };

        match exec_result {
            Err(ExecError::Pending) => {
                rt_store(&mut step.shared, &key, sf);
                return engine
                    .suspend_task(&step.task, TaskStatus::WaitingQueue, &step.shared)
                    .await;
            }
            Ok(out) => {
                let sub_action = sub_node
                    .as_ref()
                    .map(|sn| apply_sub_post(sn, &out.result, &mut sub_shared))
                    .unwrap_or_default();
                tracing::debug!(
                    task = %step.task.id,
                    node = %step.node_key,
                    sub = %curr_sub,
                    action = %sub_action,
                    "subflow sub node ok"
                );
                if !out.skip_record {
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.sub_status = "sub_node_complete".into();
                    run.branch_id = curr_sub.clone();
                    run.prep_json = json!({"sub": curr_sub}).to_string();
                    run.exec_input_json = sub_input.to_string();
                    run.exec_output_json = out.result.to_string();
                    run.action = sub_action.clone();
                    run.worker_id = out.worker_id;
                    run.worker_url = out.worker_url;
                    run.log_path = out.log_path;
                    engine.record_run(run).await;
                }

                let next_sub = find_next(&subflow.edges, &curr_sub, &sub_action);
                if next_sub.is_empty() {
                    return finish_success(engine, &mut step, &key, &sub_shared, &sub_action).await;
                }
                sf.insert("curr".into(), Value::String(next_sub));
                sf.insert("shared".into(), Value::Object(sub_shared));
                sf.insert("last".into(), Value::String(sub_action));
                rt_store(&mut step.shared, &key, sf);
                engine
                    .checkpoint_running(
                        &step.task,
                        &step.node_key,
                        &step.shared,
                        step.task.step_count + 1,
                    )
                    .await
            }
            Err(err) => {
                let msg = err.to_string();
                tracing::info!(
                    task = %step.task.id,
                    node = %step.node_key,
                    sub = %curr_sub,
                    error = %msg,
                    "subflow sub node failed"
                );
                if !matches!(err, ExecError::Replayed(_)) {
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.status = RunStatus::Error;
                    run.sub_status = "sub_node_complete".into();
                    run.branch_id = curr_sub.clone();
                    run.prep_json = json!({"sub": curr_sub}).to_string();
                    run.exec_input_json = sub_input.to_string();
                    run.error_text = msg.clone();
                    engine.record_run(run).await;
                }

                if step.node.failure_strategy == "retry"
                    && schedule_retry(&step.node, &mut sf)
                {
                    rt_store(&mut step.shared, &key, sf);
                    return engine
                        .checkpoint_running(
                            &step.task,
                            &step.node_key,
                            &step.shared,
                            step.task.step_count + 1,
                        )
                        .await;
                }
                finish_failure(engine, &mut step, &key, &sub_shared, &msg).await
            }
        }
    }
}

/// Task/node params, the sub-node's own params over them, then any
/// `subflow_execs` override for this sub-node on top.
fn child_params(step: &StepContext, sub_node: &DefNode, curr_sub: &str) -> Map<String, Value> {
    let mut out = step.params.clone();
    for (k, v) in &sub_node.params {
        out.insert(k.clone(), v.clone());
    }
    if let Some(sp) = step.node.subflow_execs.iter().find(|sp| sp.node == curr_sub) {
        if let Some(params) = &sp.params {
            for (k, v) in params {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

/// Sub-node input resolution is deliberately narrower than the top-level
/// resolver: `$params.<key>` reads the merged child params, everything
/// else is a direct key into the subflow's own shared state.
fn sub_node_input(
    sub_node: &DefNode,
    child_params: &Map<String, Value>,
    sub_shared: &Map<String, Value>,
) -> Value {
    if let Some(map) = &sub_node.prep.input_map {
        let mut out = Map::new();
        for (k, path) in map {
            let v = match path.strip_prefix("$params.") {
                Some(pk) => child_params.get(pk).cloned().unwrap_or(Value::Null),
                None => sub_shared.get(path).cloned().unwrap_or(Value::Null),
            };
            out.insert(k.clone(), v);
        }
        return Value::Object(out);
    }
    if !sub_node.prep.input_key.is_empty() {
        return match sub_node.prep.input_key.strip_prefix("$params.") {
            Some(pk) => child_params.get(pk).cloned().unwrap_or(Value::Null),
            None => sub_shared
                .get(&sub_node.prep.input_key)
                .cloned()
                .unwrap_or(Value::Null),
        };
    }
    Value::Null
}

/// Sub-node exec config: its own settings, inheriting from the parent node
/// where empty, with `subflow_execs` overrides applied last.
fn effective_config(parent: &DefNode, curr_sub: &str, sub_node: &DefNode) -> DefNode {
    let mut eff = DefNode {
        service: sub_node.service.clone(),
        exec_type: sub_node.exec_type.clone(),
        func: sub_node.func.clone(),
        script: sub_node.script.clone(),
        weighted_by_load: parent.weighted_by_load,
        max_attempts: parent.max_attempts,
        attempt_delay_millis: parent.attempt_delay_millis,
        ..DefNode::default()
    };
    if eff.exec_type.is_empty() && !parent.exec_type.is_empty() {
        eff.exec_type = parent.exec_type.clone();
    }
    if eff.func.is_empty() && !parent.func.is_empty() {
        eff.func = parent.func.clone();
    }
    if eff.script.cmd.is_empty() && eff.script.code.is_empty() && !parent.script.cmd.is_empty() {
        eff.script = parent.script.clone();
    }
    if let Some(sp) = parent.subflow_execs.iter().find(|sp| sp.node == curr_sub) {
        if !sp.service.is_empty() {
            eff.service = sp.service.clone();
        }
        if !sp.exec_type.is_empty() {
            eff.exec_type = sp.exec_type.clone();
        }
        if !sp.func.is_empty() {
            eff.func = sp.func.clone();
        }
        if !sp.script.cmd.is_empty() || !sp.script.code.is_empty() {
            eff.script = sp.script.clone();
        }
    }
    eff
}

/// Fold a successful sub-node result into the subflow's shared state and
/// derive its outbound action.
fn apply_sub_post(sub_node: &DefNode, result: &Value, sub_shared: &mut Map<String, Value>) -> String {
    super::apply_outputs(&sub_node.post, result, sub_shared);
    if !sub_node.post.action_static.is_empty() {
        sub_node.post.action_static.clone()
    } else if !sub_node.post.action_key.is_empty() {
        pick_action(result, &sub_node.post.action_key)
    } else {
        String::new()
    }
}

/// Bump the retry counter and stamp the next attempt time. Returns false
/// once retries are exhausted.
fn schedule_retry(node: &DefNode, sf: &mut Map<String, Value>) -> bool {
    let retries = sf.get("retries").and_then(Value::as_f64).unwrap_or(0.0) as i64 + 1;
    sf.insert("retries".into(), json!(retries));
    if node.wait_millis > 0 {
        sf.insert("next_try_at".into(), json!(now_millis() + node.wait_millis));
    }
    !(node.max_retries > 0 && retries >= node.max_retries)
}

async fn finish_success(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    sub_shared: &Map<String, Value>,
    _last_action: &str,
) -> Result<(), EngineError> {
    if !step.node.post.output_key.is_empty() {
        step.shared.insert(
            step.node.post.output_key.clone(),
            Value::Object(sub_shared.clone()),
        );
    }
    let action = if !step.node.post.action_static.is_empty() {
        step.node.post.action_static.clone()
    } else if !step.node.post.action_key.is_empty() {
        pick_action(&Value::Object(sub_shared.clone()), &step.node.post.action_key)
    } else {
        String::new()
    };
    rt_clear(&mut step.shared, key);
    tracing::info!(task = %step.task.id, node = %step.node_key, action = %action, "subflow finished");
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

async fn finish_failure(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    sub_shared: &Map<String, Value>,
    error: &str,
) -> Result<(), EngineError> {
    let action = if !step.node.post.action_static.is_empty() {
        step.node.post.action_static.clone()
    } else if !step.node.post.action_key.is_empty() {
        pick_action(&Value::Object(sub_shared.clone()), &step.node.post.action_key)
    } else {
        String::new()
    };
    if !step.node.post.output_key.is_empty() {
        step.shared.insert(
            step.node.post.output_key.clone(),
            Value::Object(sub_shared.clone()),
        );
    }
    rt_clear(&mut step.shared, key);
    let exec_err = if step.node.failure_strategy == "continue" {
        None
    } else {
        Some(error)
    };
    engine
        .finish_node(
            &step.task,
            &step.def,
            &step.node_key,
            &action,
            &step.shared,
            step.task.step_count + 1,
            exec_err,
        )
        .await
}
