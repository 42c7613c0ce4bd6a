//! Foreach node runner: fan out over the elements of a list input.
//!
//! Semantics mirror the parallel runner with per-index execution; progress
//! lives under `_rt["fe:<node>"]` keyed by the stringified index, and
//! `foreach_execs` may override execution config for specific indices.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};

use super::{branch_node, branch_params};
use crate::engine::{rt_clear, rt_load, rt_store, Engine, ExecInput, NodeRunner, StepContext};
use crate::error::{EngineError, ExecError};
use crate::model::{pick_action, ExecSpec};
use crate::store::{RunStatus, TaskStatus};

pub struct ForeachRunner;

#[async_trait]
impl NodeRunner for ForeachRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let items: Vec<Value> = step.input.as_array().cloned().unwrap_or_default();

        // An empty list takes the static action immediately.
        if items.is_empty() {
            let mut run = engine.new_run(&step.task, &step.node_key);
            run.prep_json = json!({"input_key": step.node.prep.input_key}).to_string();
            run.exec_input_json = step.input.to_string();
            run.exec_output_json = "[]".into();
            run.action = step.node.post.action_static.clone();
            engine.record_run(run).await;
            let action = step.node.post.action_static.clone();
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

        let key = format!("fe:{}", step.node_key);
        let state = rt_load(&step.shared, &key).unwrap_or_else(|| {
            json!({
                "done": {},
                "errs": {},
                "idx": 0,
                "mode": step.node.parallel_mode,
                "max": step.node.max_parallel,
                "strategy": step.node.failure_strategy,
            })
            .as_object()
            .cloned()
            .unwrap_or_default()
        });
        let mut done = state
            .get("done")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut errs = state
            .get("errs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mode = state
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let remaining: Vec<usize> = (0..items.len())
            .filter(|i| {
                let k = i.to_string();
                !done.contains_key(&k) && !errs.contains_key(&k)
            })
            .collect();
        tracing::debug!(
            task = %step.task.id,
            node = %step.node_key,
            mode = %mode,
            remaining = remaining.len(),
            total = items.len(),
            "foreach step"
        );

        if remaining.is_empty() {
            return finish_aggregate(engine, &mut step, &key, &items, &done, &errs).await;
        }

        if mode == "concurrent" {
            run_concurrent(engine, &mut step, &key, &items, &remaining, &mut done, &mut errs).await
        } else {
            run_sequential(engine, &mut step, &key, &items, &remaining, &mut done, &mut errs).await
        }
    }
}

fn spec_for<'a>(step: &'a StepContext, idx: usize) -> Option<&'a ExecSpec> {
    step.node.foreach_execs.iter().find(|sp| sp.index == idx)
}

fn save_state(
    step: &mut StepContext,
    key: &str,
    done: &Map<String, Value>,
    errs: &Map<String, Value>,
) {
    let state = json!({
        "done": done,
        "errs": errs,
        "idx": 0,
        "mode": step.node.parallel_mode,
        "max": step.node.max_parallel,
        "strategy": step.node.failure_strategy,
    })
    .as_object()
    .cloned()
    .unwrap_or_default();
    rt_store(&mut step.shared, key, state);
}

fn pick_post_action(step: &StepContext, agg: &Value) -> String {
    if !step.node.post.action_static.is_empty() {
        step.node.post.action_static.clone()
    } else if !step.node.post.action_key.is_empty() {
        pick_action(&json!({"result": agg}), &step.node.post.action_key)
    } else {
        String::new()
    }
}

fn record_item(
    engine: &Engine,
    step: &StepContext,
    idx: usize,
    item: &Value,
    status: RunStatus,
    output: Option<&Value>,
    error_text: &str,
    worker: (&str, &str, &str),
) -> crate::store::NodeRun {
    let mut run = engine.new_run(&step.task, &step.node_key);
    run.status = status;
    run.sub_status = "item_complete".into();
    run.branch_id = idx.to_string();
    run.prep_json = json!({"branch": idx}).to_string();
    run.exec_input_json = item.to_string();
    if let Some(out) = output {
        run.exec_output_json = out.to_string();
    }
    run.error_text = error_text.to_string();
    run.worker_id = worker.0.to_string();
    run.worker_url = worker.1.to_string();
    run.log_path = worker.2.to_string();
    run
}

/// All indices accounted for: aggregate in index order and finish.
async fn finish_aggregate(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    items: &[Value],
    done: &Map<String, Value>,
    errs: &Map<String, Value>,
) -> Result<(), EngineError> {
    let agg = Value::Array(
        (0..items.len())
            .map(|i| done.get(&i.to_string()).cloned().unwrap_or(Value::Null))
            .collect(),
    );
    let action = {
        let a = step.node.post.action_static.clone();
        if a.is_empty() && !step.node.post.action_key.is_empty() {
            pick_action(&json!({"result": agg}), &step.node.post.action_key)
        } else {
            a
        }
    };
    if !step.node.post.output_key.is_empty() {
        step.shared.insert(step.node.post.output_key.clone(), agg.clone());
    }
    rt_clear(&mut step.shared, key);

    let ok = errs.is_empty() || step.node.failure_strategy == "continue";
    let mut run = engine.new_run(&step.task, &step.node_key);
    run.status = if ok { RunStatus::Ok } else { RunStatus::Error };
    run.prep_json = json!({"input_key": step.node.prep.input_key}).to_string();
    run.exec_input_json = step.input.to_string();
    run.exec_output_json = agg.to_string();
    if !ok {
        run.error_text = Value::Object(errs.clone()).to_string();
    }
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
            if ok { None } else { Some("foreach error") },
        )
        .await
}

async fn finish_fail_fast(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    items: &[Value],
    done: &Map<String, Value>,
) -> Result<(), EngineError> {
    let agg = Value::Array(
        (0..items.len())
            .filter_map(|i| done.get(&i.to_string()).cloned())
            .collect(),
    );
    let action = pick_post_action(step, &agg);
    if !step.node.post.output_key.is_empty() {
        step.shared.insert(step.node.post.output_key.clone(), agg.clone());
    }
    rt_clear(&mut step.shared, key);
    engine
        .finish_node(
            &step.task,
            &step.def,
            &step.node_key,
            &action,
            &step.shared,
            step.task.step_count + 1,
            Some("foreach error"),
        )
        .await
}

#[allow(clippy::too_many_arguments)]
async fn run_concurrent(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    items: &[Value],
    remaining: &[usize],
    done: &mut Map<String, Value>,
    errs: &mut Map<String, Value>,
) -> Result<(), EngineError> {
    let max = if step.node.max_parallel == 0 || step.node.max_parallel > remaining.len() {
        remaining.len()
    } else {
        step.node.max_parallel
    };
    let selected = &remaining[..max];

    let branches = selected.iter().map(|&idx| {
        let eff = branch_node(&step.node, &step.node.service, spec_for(step, idx));
        let call_params = branch_params(&step.params, spec_for(step, idx));
        let branch = idx.to_string();
        let task = &step.task;
        let node_key = &step.node_key;
        let item = &items[idx];
        async move {
            let res = engine
                .exec_unit(ExecInput {
                    task,
                    node: &eff,
                    node_key,
                    branch_id: &branch,
                    input: item,
                    params: &call_params,
                })
                .await;
            (idx, res)
        }
    });
    let results = join_all(branches).await;

    let mut had_err = false;
    let mut has_pending = false;
    for (idx, res) in results {
        match res {
            Err(ExecError::Pending) => {
                has_pending = true;
                tracing::info!(task = %step.task.id, node = %step.node_key, branch = idx, "item pending in queue");
            }
            Ok(out) => {
                if !out.skip_record {
                    let run = record_item(
                        engine,
                        step,
                        idx,
                        &items[idx],
                        RunStatus::Ok,
                        Some(&out.result),
                        "",
                        (&out.worker_id, &out.worker_url, &out.log_path),
                    );
                    engine.record_run(run).await;
                }
                done.insert(idx.to_string(), out.result);
            }
            Err(e) => {
                had_err = true;
                let msg = e.to_string();
                if !matches!(e, ExecError::Replayed(_)) {
                    let run = record_item(
                        engine,
                        step,
                        idx,
                        &items[idx],
                        RunStatus::Error,
                        None,
                        &msg,
                        ("", "", ""),
                    );
                    engine.record_run(run).await;
                }
                errs.insert(idx.to_string(), Value::String(msg));
            }
        }
    }

    save_state(step, key, done, errs);
    if has_pending {
        return engine
            .suspend_task(&step.task, TaskStatus::WaitingQueue, &step.shared)
            .await;
    }
    if step.node.failure_strategy == "fail_fast" && had_err {
        return finish_fail_fast(engine, step, key, items, done).await;
    }
    engine
        .checkpoint_running(&step.task, &step.node_key, &step.shared, step.task.step_count + 1)
        .await
}

#[allow(clippy::too_many_arguments)]
async fn run_sequential(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    items: &[Value],
    remaining: &[usize],
    done: &mut Map<String, Value>,
    errs: &mut Map<String, Value>,
) -> Result<(), EngineError> {
    let idx = remaining[0];
    let eff = branch_node(&step.node, &step.node.service, spec_for(step, idx));
    let call_params = branch_params(&step.params, spec_for(step, idx));
    let branch = idx.to_string();
    let res = engine
        .exec_unit(ExecInput {
            task: &step.task,
            node: &eff,
            node_key: &step.node_key,
            branch_id: &branch,
            input: &items[idx],
            params: &call_params,
        })
        .await;

    match res {
        Err(ExecError::Pending) => {
            save_state(step, key, done, errs);
            engine
                .suspend_task(&step.task, TaskStatus::WaitingQueue, &step.shared)
                .await
        }
        Ok(out) => {
            if !out.skip_record {
                let run = record_item(
                    engine,
                    step,
                    idx,
                    &items[idx],
                    RunStatus::Ok,
                    Some(&out.result),
                    "",
                    (&out.worker_id, &out.worker_url, &out.log_path),
                );
                engine.record_run(run).await;
            }
            done.insert(branch, out.result);
            save_state(step, key, done, errs);
            engine
                .checkpoint_running(&step.task, &step.node_key, &step.shared, step.task.step_count + 1)
                .await
        }
        Err(e) => {
            let msg = e.to_string();
            if !matches!(e, ExecError::Replayed(_)) {
                let run = record_item(
                    engine,
                    step,
                    idx,
                    &items[idx],
                    RunStatus::Error,
                    None,
                    &msg,
                    ("", "", ""),
                );
                engine.record_run(run).await;
            }
            errs.insert(branch, Value::String(msg));
            save_state(step, key, done, errs);
            engine
                .checkpoint_running(&step.task, &step.node_key, &step.shared, step.task.step_count + 1)
                .await
        }
    }
}
