//! Flow definition model.
//!
//! A [`FlowDef`] is decoded from the `definition_json` of a published flow
//! version and never mutated afterwards: tasks pin to exactly one version.
//! Nodes are polymorphic over [`NodeKind`]; the shared prep/post/retry
//! envelopes live on [`DefNode`] because exec-spec overrides and subflow
//! inheritance operate field-wise across kinds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Node kinds dispatched by the engine. Unrecognized kinds fall back to
/// the executor runner, as do the empty string and the legacy `remote`
/// spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeKind {
    #[default]
    Executor,
    Choice,
    Parallel,
    Foreach,
    Subflow,
    Timer,
    WaitEvent,
    Approval,
}

impl NodeKind {
    pub fn from_tag(tag: &str) -> NodeKind {
        match tag {
            "choice" => NodeKind::Choice,
            "parallel" => NodeKind::Parallel,
            "foreach" => NodeKind::Foreach,
            "subflow" => NodeKind::Subflow,
            "timer" => NodeKind::Timer,
            "wait_event" => NodeKind::WaitEvent,
            "approval" => NodeKind::Approval,
            _ => NodeKind::Executor,
        }
    }

    /// Registry key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            NodeKind::Executor => "executor",
            NodeKind::Choice => "choice",
            NodeKind::Parallel => "parallel",
            NodeKind::Foreach => "foreach",
            NodeKind::Subflow => "subflow",
            NodeKind::Timer => "timer",
            NodeKind::WaitEvent => "wait_event",
            NodeKind::Approval => "approval",
        }
    }
}

impl Serialize for NodeKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(NodeKind::from_tag(&tag))
    }
}

/// How a node derives its execution input from shared state and params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepSpec {
    #[serde(default)]
    pub input_key: String,
    #[serde(default)]
    pub input_map: Option<HashMap<String, String>>,
}

/// How a node maps its result into shared state and picks the outbound
/// action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostSpec {
    #[serde(default)]
    pub output_key: String,
    #[serde(default)]
    pub output_map: Option<HashMap<String, String>>,
    #[serde(default)]
    pub action_static: String,
    #[serde(default)]
    pub action_key: String,
}

/// Local process specification for `exec_type = "local_script"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSpec {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, rename = "timeout_ms")]
    pub timeout_millis: i64,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub stdin_mode: String,
    #[serde(default)]
    pub output_mode: String,
    /// Inline script source; written to a temp file and run under the
    /// interpreter selected by `language` (or `cmd`).
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
}

/// Per-branch execution override used by parallel (`service`-keyed),
/// foreach (`index`-keyed) and subflow (`node`-keyed) runners. Empty fields
/// inherit from the owning node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecSpec {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub exec_type: String,
    #[serde(default)]
    pub func: String,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub script: ScriptSpec,
}

/// One case of a choice node: the first case whose `expr` evaluates true
/// contributes its `action`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceCase {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub expr: Value,
}

/// A node of the flow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefNode {
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub service: String,
    /// Executor dispatch selector; empty means `http`.
    #[serde(default)]
    pub exec_type: String,
    #[serde(default)]
    pub func: String,
    #[serde(default)]
    pub script: ScriptSpec,
    /// Static params merged *under* task params (task overrides node).
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub prep: PrepSpec,
    #[serde(default)]
    pub post: PostSpec,
    /// Outer retry bound for the node runner: `max_retries + 1` attempts.
    #[serde(default)]
    pub max_retries: i64,
    /// Delay between outer retries.
    #[serde(default, rename = "wait_ms")]
    pub wait_millis: i64,
    /// Inner attempt bound within one executor dispatch (HTTP worker walk,
    /// local function / script loop). Zero means a single pass.
    #[serde(default)]
    pub max_attempts: i64,
    #[serde(default, rename = "attempt_delay_ms")]
    pub attempt_delay_millis: i64,
    #[serde(default)]
    pub weighted_by_load: bool,
    #[serde(default)]
    pub parallel_services: Vec<String>,
    #[serde(default)]
    pub parallel_execs: Vec<ExecSpec>,
    #[serde(default)]
    pub foreach_execs: Vec<ExecSpec>,
    #[serde(default)]
    pub default_action: String,
    #[serde(default)]
    pub subflow: Option<EmbeddedFlow>,
    #[serde(default)]
    pub subflow_execs: Vec<ExecSpec>,
    #[serde(default)]
    pub choice_cases: Vec<ChoiceCase>,
    /// `"concurrent"` or `"sequential"` for parallel/foreach nodes.
    #[serde(default)]
    pub parallel_mode: String,
    #[serde(default)]
    pub max_parallel: usize,
    /// `"continue"`, `"fail_fast"`, or `"retry"`; meaning depends on kind.
    #[serde(default)]
    pub failure_strategy: String,
}

/// A directed transition. `action == ""` is normalized to `"default"` at
/// lookup time; an empty `to` terminates the flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefEdge {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub to: String,
}

/// A complete flow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDef {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub nodes: HashMap<String, DefNode>,
    #[serde(default)]
    pub edges: Vec<DefEdge>,
}

impl FlowDef {
    pub fn from_json(definition_json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(definition_json)
    }
}

/// A flow nested inside a subflow node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddedFlow {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub nodes: HashMap<String, DefNode>,
    #[serde(default)]
    pub edges: Vec<DefEdge>,
}

/// Resolve the next node key for `(from, action)`. An empty action matches
/// edges labeled `"default"`; no matching edge means the flow terminates.
pub fn find_next(edges: &[DefEdge], from: &str, action: &str) -> String {
    let a = if action.is_empty() { "default" } else { action };
    edges
        .iter()
        .find(|e| e.from == from && e.action == a)
        .map(|e| e.to.clone())
        .unwrap_or_default()
}

/// Extract a string action from a mapping result under `key`.
pub fn pick_action(res: &Value, key: &str) -> String {
    res.as_object()
        .and_then(|m| m.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}
