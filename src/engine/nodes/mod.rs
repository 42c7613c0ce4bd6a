//! Node runners, one per node kind.
//!
//! Runners share a small vocabulary: they derive an outbound action via
//! the node's post spec, fold results into shared state, checkpoint
//! multi-entry progress under `_rt`, and commit through
//! [`Engine::finish_node`](super::Engine), which resolves the outbound
//! edge and the terminal status.

mod approval;
mod choice;
mod executor;
mod foreach;
mod parallel;
mod subflow;
mod timer;
mod wait_event;

pub use approval::ApprovalRunner;
pub use choice::ChoiceRunner;
pub use executor::ExecutorRunner;
pub use foreach::ForeachRunner;
pub use parallel::ParallelRunner;
pub use subflow::SubflowRunner;
pub use timer::TimerRunner;
pub use wait_event::WaitEventRunner;

use serde_json::{Map, Value};

use crate::model::{DefNode, ExecSpec};

/// Effective execution config for one fan-out branch: the owning node's
/// exec settings with the branch's spec overriding non-empty fields.
pub(crate) fn branch_node(node: &DefNode, service: &str, spec: Option<&ExecSpec>) -> DefNode {
    let mut eff = DefNode {
        service: service.to_string(),
        exec_type: node.exec_type.clone(),
        func: node.func.clone(),
        script: node.script.clone(),
        weighted_by_load: node.weighted_by_load,
        max_attempts: node.max_attempts,
        attempt_delay_millis: node.attempt_delay_millis,
        ..DefNode::default()
    };
    if let Some(sp) = spec {
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

/// Call params for one branch: node-level params with the spec's params
/// layered on top.
pub(crate) fn branch_params(
    params: &Map<String, Value>,
    spec: Option<&ExecSpec>,
) -> Map<String, Value> {
    let mut out = params.clone();
    if let Some(overrides) = spec.and_then(|sp| sp.params.as_ref()) {
        for (k, v) in overrides {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Apply a post spec's output mapping to a state map.
pub(crate) fn apply_outputs(
    post: &crate::model::PostSpec,
    result: &Value,
    state: &mut Map<String, Value>,
) {
    if let Some(output_map) = &post.output_map {
        if let Some(fields) = result.as_object() {
            for (to_key, from_field) in output_map {
                state.insert(
                    to_key.clone(),
                    fields.get(from_field).cloned().unwrap_or(Value::Null),
                );
            }
        }
    }
    if !post.output_key.is_empty() {
        state.insert(post.output_key.clone(), result.clone());
    }
}
