//! Parallel node runner: fan out one input across a set of services.
//!
//! Progress lives under `_rt["pl:<node>"]` as `{done, errs, mode, max,
//! strategy}` so a crashed scheduler resumes exactly where the fan-out
//! stood. Concurrent mode joins up to `max_parallel` branches inside a
//! single step; sequential mode runs one branch per step and lets the
//! scheduler drive the iteration.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::{branch_node, branch_params};
use crate::engine::{rt_clear, rt_load, rt_store, Engine, ExecInput, NodeRunner, StepContext};
use crate::error::{EngineError, ExecError};
use crate::model::{pick_action, ExecSpec};
use crate::store::{RunStatus, TaskStatus};

pub struct ParallelRunner;

#[async_trait]
impl NodeRunner for ParallelRunner {
    async fn run(&self, engine: &Engine, mut step: StepContext) -> Result<(), EngineError> {
        let (services, specs) = resolve_services(&step);
        if services.is_empty() {
            let mut run = engine.new_run(&step.task, &step.node_key);
            run.status = RunStatus::Error;
            run.prep_json = json!({"input_key": step.node.prep.input_key}).to_string();
            run.exec_input_json = step.input.to_string();
            run.error_text = "no services".into();
            engine.record_run(run).await;
            return engine
                .finish_node(
                    &step.task,
                    &step.def,
                    &step.node_key,
                    "",
                    &step.shared,
                    step.task.step_count + 1,
                    Some("no services"),
                )
                .await;
        }

        let key = format!("pl:{}", step.node_key);
        let state = rt_load(&step.shared, &key).unwrap_or_else(|| {
            json!({
                "done": {},
                "errs": {},
                "mode": step.node.parallel_mode,
                "max": step.node.max_parallel,
                "strategy": step.node.failure_strategy,
            })
            .as_object()
            .cloned()
            .unwrap_or_default()
        });
        let mut done = state_map(&state, "done");
        let mut errs = state_map(&state, "errs");
        let mode = state
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // A branch is accounted for once it has a result or an error.
        let remaining: Vec<String> = services
            .iter()
            .filter(|s| !done.contains_key(*s) && !errs.contains_key(*s))
            .cloned()
            .collect();
        tracing::debug!(
            task = %step.task.id,
            node = %step.node_key,
            mode = %mode,
            remaining = remaining.len(),
            total = services.len(),
            "parallel step"
        );

        if remaining.is_empty() {
            return finish_aggregate(engine, &mut step, &key, &services, &done, &errs).await;
        }

        if mode == "concurrent" {
            run_concurrent(engine, &mut step, &key, &services, &specs, &remaining, &mut done, &mut errs).await
        } else {
            run_sequential(engine, &mut step, &key, &specs, &remaining, &mut done, &mut errs).await
        }
    }
}

fn resolve_services(step: &StepContext) -> (Vec<String>, HashMap<String, ExecSpec>) {
    let mut specs = HashMap::new();
    let mut services = step.node.parallel_services.clone();
    if !step.node.parallel_execs.is_empty() {
        services = Vec::new();
        for sp in &step.node.parallel_execs {
            services.push(sp.service.clone());
            specs.insert(sp.service.clone(), sp.clone());
        }
    }
    if services.is_empty() {
        if let Some(arr) = step.params.get("services").and_then(Value::as_array) {
            services = arr
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
    }
    (services, specs)
}

fn state_map(state: &Map<String, Value>, key: &str) -> Map<String, Value> {
    state
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
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

/// All branches accounted for: aggregate in declared service order and
/// finish under the failure strategy.
async fn finish_aggregate(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    services: &[String],
    done: &Map<String, Value>,
    errs: &Map<String, Value>,
) -> Result<(), EngineError> {
    let agg = Value::Array(
        services
            .iter()
            .map(|s| done.get(s).cloned().unwrap_or(Value::Null))
            .collect(),
    );
    if !step.node.post.output_key.is_empty() {
        step.shared.insert(step.node.post.output_key.clone(), agg.clone());
    }
    let action = pick_post_action(step, &agg);
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
            if ok { None } else { Some("parallel error") },
        )
        .await
}

/// First errored branch under `fail_fast`: aggregate what completed and
/// finish with an error without waiting for the rest.
async fn finish_fail_fast(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    services: &[String],
    done: &Map<String, Value>,
    errs: &Map<String, Value>,
) -> Result<(), EngineError> {
    tracing::info!(
        task = %step.task.id,
        node = %step.node_key,
        errors = errs.len(),
        "parallel fail_fast"
    );
    let agg = Value::Array(
        services
            .iter()
            .filter_map(|s| done.get(s).cloned())
            .collect(),
    );
    if !step.node.post.output_key.is_empty() {
        step.shared.insert(step.node.post.output_key.clone(), agg.clone());
    }
    let action = pick_post_action(step, &agg);
    rt_clear(&mut step.shared, key);
    engine
        .finish_node(
            &step.task,
            &step.def,
            &step.node_key,
            &action,
            &step.shared,
            step.task.step_count + 1,
            Some("parallel error"),
        )
        .await
}

#[allow(clippy::too_many_arguments)]
async fn run_concurrent(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    services: &[String],
    specs: &HashMap<String, ExecSpec>,
    remaining: &[String],
    done: &mut Map<String, Value>,
    errs: &mut Map<String, Value>,
) -> Result<(), EngineError> {
    let max = if step.node.max_parallel == 0 || step.node.max_parallel > remaining.len() {
        remaining.len()
    } else {
        step.node.max_parallel
    };
    let to_run = &remaining[..max];
    tracing::debug!(task = %step.task.id, node = %step.node_key, launch = to_run.len(), "parallel launch");

    let branches = to_run.iter().map(|svc| {
        let eff = branch_node(&step.node, svc, specs.get(svc));
        let call_params = branch_params(&step.params, specs.get(svc));
        let task = &step.task;
        let node_key = &step.node_key;
        let input = &step.input;
        async move {
            let res = engine
                .exec_unit(ExecInput {
                    task,
                    node: &eff,
                    node_key,
                    branch_id: svc,
                    input,
                    params: &call_params,
                })
                .await;
            (svc.clone(), res)
        }
    });
    let results = join_all(branches).await;

    let mut had_err = false;
    let mut has_pending = false;
    for (svc, res) in results {
        match res {
            Err(ExecError::Pending) => {
                has_pending = true;
                tracing::info!(task = %step.task.id, node = %step.node_key, branch = %svc, "branch pending in queue");
            }
            Ok(out) => {
                if !out.skip_record {
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.sub_status = "branch_complete".into();
                    run.branch_id = svc.clone();
                    run.prep_json =
                        json!({"input_key": step.node.prep.input_key, "branch": svc}).to_string();
                    run.exec_input_json = step.input.to_string();
                    run.exec_output_json = out.result.to_string();
                    run.worker_id = out.worker_id;
                    run.worker_url = out.worker_url;
                    run.log_path = out.log_path;
                    engine.record_run(run).await;
                }
                done.insert(svc, out.result);
            }
            Err(e) => {
                had_err = true;
                let msg = e.to_string();
                tracing::info!(task = %step.task.id, node = %step.node_key, branch = %svc, error = %msg, "branch failed");
                if !matches!(e, ExecError::Replayed(_)) {
                    let mut run = engine.new_run(&step.task, &step.node_key);
                    run.status = RunStatus::Error;
                    run.sub_status = "branch_complete".into();
                    run.branch_id = svc.clone();
                    run.prep_json =
                        json!({"input_key": step.node.prep.input_key, "branch": svc}).to_string();
                    run.exec_input_json = step.input.to_string();
                    run.error_text = msg.clone();
                    engine.record_run(run).await;
                }
                errs.insert(svc, Value::String(msg));
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
        return finish_fail_fast(engine, step, key, services, done, errs).await;
    }
    engine
        .checkpoint_running(&step.task, &step.node_key, &step.shared, step.task.step_count + 1)
        .await
}

async fn run_sequential(
    engine: &Engine,
    step: &mut StepContext,
    key: &str,
    specs: &HashMap<String, ExecSpec>,
    remaining: &[String],
    done: &mut Map<String, Value>,
    errs: &mut Map<String, Value>,
) -> Result<(), EngineError> {
    let svc = remaining[0].clone();
    tracing::debug!(task = %step.task.id, node = %step.node_key, branch = %svc, "parallel sequential branch");
    let eff = branch_node(&step.node, &svc, specs.get(&svc));
    let call_params = branch_params(&step.params, specs.get(&svc));
    let res = engine
        .exec_unit(ExecInput {
            task: &step.task,
            node: &eff,
            node_key: &step.node_key,
            branch_id: &svc,
            input: &step.input,
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
                let mut run = engine.new_run(&step.task, &step.node_key);
                run.sub_status = "branch_complete".into();
                run.branch_id = svc.clone();
                run.prep_json =
                    json!({"input_key": step.node.prep.input_key, "branch": svc}).to_string();
                run.exec_input_json = step.input.to_string();
                run.exec_output_json = out.result.to_string();
                run.worker_id = out.worker_id;
                run.worker_url = out.worker_url;
                run.log_path = out.log_path;
                engine.record_run(run).await;
            }
            done.insert(svc, out.result);
            save_state(step, key, done, errs);
            engine
                .checkpoint_running(&step.task, &step.node_key, &step.shared, step.task.step_count + 1)
                .await
        }
        Err(e) => {
            let msg = e.to_string();
            if !matches!(e, ExecError::Replayed(_)) {
                let mut run = engine.new_run(&step.task, &step.node_key);
                run.status = RunStatus::Error;
                run.sub_status = "branch_complete".into();
                run.branch_id = svc.clone();
                run.prep_json =
                    json!({"input_key": step.node.prep.input_key, "branch": svc}).to_string();
                run.exec_input_json = step.input.to_string();
                run.error_text = msg.clone();
                engine.record_run(run).await;
            }
            errs.insert(svc, Value::String(msg));
            save_state(step, key, done, errs);
            engine
                .checkpoint_running(&step.task, &step.node_key, &step.shared, step.task.step_count + 1)
                .await
        }
    }
}
