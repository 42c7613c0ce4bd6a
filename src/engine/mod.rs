//! The single-step workflow interpreter.
//!
//! [`Engine::run_once`] performs exactly one node visit for a task and
//! returns; the scheduler loop re-enters it until the task terminates or
//! suspends. Every mutation during a step is conditional on lease
//! ownership, so a crashed or fenced-out scheduler can never corrupt a
//! task another owner has claimed.

mod exec_http;
mod exec_local;
mod exec_queue;
mod exec_script;
mod executor;
pub mod nodes;
mod runner;

pub use exec_local::LocalFunc;
pub use executor::{ExecInput, ExecOutcome};
pub use runner::{NodeRunner, NodeRunnerRegistry, StepContext};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::now_secs;
use crate::error::{EngineError, StoreError};
use crate::model::{DefNode, FlowDef, NodeKind};
use crate::store::{NodeRun, RunStatus, SqliteStore, Task, TaskStatus};
use crate::workers::WorkerRegistry;

/// Reserved shared-state key holding runner-private runtime state. Removed
/// from the user-visible projection when its owning runner finalizes.
pub const RT_KEY: &str = "_rt";

/// The execution engine. One instance serves a whole scheduler process;
/// local functions are registered at startup and read-only afterwards.
pub struct Engine {
    store: Arc<SqliteStore>,
    workers: WorkerRegistry,
    http: reqwest::Client,
    /// Scheduler identity for owned writes. Empty disables lease
    /// enforcement (tests and one-shot tooling drive steps directly).
    owner: String,
    funcs: RwLock<HashMap<String, Arc<dyn LocalFunc>>>,
    runners: NodeRunnerRegistry,
    log_dir: PathBuf,
}

impl Engine {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        let workers = WorkerRegistry::new(store.clone(), 15);
        Engine {
            store,
            workers,
            http: reqwest::Client::new(),
            owner: String::new(),
            funcs: RwLock::new(HashMap::new()),
            runners: NodeRunnerRegistry::with_builtins(),
            log_dir: PathBuf::from("logs"),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_worker_registry(mut self, workers: WorkerRegistry) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub(crate) fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn log_dir(&self) -> &PathBuf {
        &self.log_dir
    }

    /// Register a local function under `name`. Call before the scheduler
    /// starts; the registry is read-only during execution.
    pub fn register_func(&self, name: &str, func: Arc<dyn LocalFunc>) {
        self.funcs.write().insert(name.to_string(), func);
    }

    /// Register a plain closure as a local function.
    pub fn register_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(Value, &Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register_func(name, Arc::new(exec_local::FnFunc(f)));
    }

    pub(crate) fn local_func(&self, name: &str) -> Option<Arc<dyn LocalFunc>> {
        self.funcs.read().get(name).cloned()
    }

    /// Execute one node visit for `task_id`.
    pub async fn run_once(&self, task_id: &str) -> Result<(), EngineError> {
        let task = self.store.get_task(task_id).await?;
        if !self.owner.is_empty() {
            if task.lease_owner != self.owner {
                return Err(EngineError::LeaseMismatch);
            }
            if task.lease_expiry <= now_secs() {
                return Err(EngineError::LeaseExpired);
            }
        }

        if task.status == TaskStatus::Canceling {
            return self.cancel_task(task).await;
        }

        let version = self.store.get_flow_version(&task.flow_version_id).await?;
        let def = FlowDef::from_json(&version.definition_json)?;
        let node_key = task.current_node_key.clone();
        let node = def
            .nodes
            .get(&node_key)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(node_key.clone()))?;

        let shared: Map<String, Value> = serde_json::from_str(&task.shared_json).unwrap_or_default();
        let params = merge_params(&node, &task.params_json);
        let input = build_input(&node, &shared, &params);

        // A subflow node without an embedded flow degrades to a plain
        // executor, as does any unrecognized kind.
        let kind_key = if node.kind == NodeKind::Subflow && node.subflow.is_none() {
            "executor"
        } else {
            node.kind.key()
        };
        tracing::debug!(task = %task.id, node = %node_key, kind = kind_key, step = task.step_count, "run step");
        let runner = self
            .runners
            .get(kind_key)
            .ok_or_else(|| EngineError::NodeNotFound(format!("runner for kind {kind_key}")))?;
        runner
            .run(
                self,
                StepContext {
                    task,
                    def,
                    node,
                    node_key,
                    shared,
                    params,
                    input,
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Step bookkeeping shared by all runners
    // ------------------------------------------------------------------

    async fn set_status(&self, task: &Task, status: TaskStatus) -> Result<(), StoreError> {
        if self.owner.is_empty() {
            self.store.update_task_status(&task.id, status).await
        } else {
            self.store
                .update_task_status_owned(&task.id, &self.owner, status)
                .await
        }
    }

    async fn set_progress(
        &self,
        task: &Task,
        current_node: &str,
        last_action: &str,
        shared: &Map<String, Value>,
        step_count: i64,
    ) -> Result<(), StoreError> {
        let shared_json = shared_to_json(shared);
        if self.owner.is_empty() {
            self.store
                .update_task_progress(&task.id, current_node, last_action, &shared_json, step_count)
                .await
        } else {
            self.store
                .update_task_progress_owned(
                    &task.id,
                    &self.owner,
                    current_node,
                    last_action,
                    &shared_json,
                    step_count,
                )
                .await
        }
    }

    /// Commit a finished node visit: resolve the outbound edge, persist
    /// shared state, advance the cursor, and set the terminal status when
    /// the flow ends here.
    pub(crate) async fn finish_node(
        &self,
        task: &Task,
        def: &FlowDef,
        curr: &str,
        action: &str,
        shared: &Map<String, Value>,
        step_count: i64,
        exec_err: Option<&str>,
    ) -> Result<(), EngineError> {
        let next = crate::model::find_next(&def.edges, curr, action);
        let status = match (next.is_empty(), exec_err) {
            (true, None) => TaskStatus::Completed,
            (true, Some(_)) => TaskStatus::Failed,
            (false, _) => TaskStatus::Running,
        };
        self.set_status(task, status).await?;
        self.set_progress(task, &next, action, shared, step_count).await?;
        tracing::info!(
            task = %task.id,
            node = %curr,
            action = %action,
            next = %next,
            status = status.as_str(),
            error = exec_err.unwrap_or(""),
            "node finished"
        );
        Ok(())
    }

    /// Leave the task non-runnable without advancing the cursor. The lease
    /// simply expires; any scheduler may resume the task later.
    pub(crate) async fn suspend_task(
        &self,
        task: &Task,
        status: TaskStatus,
        shared: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        tracing::info!(task = %task.id, node = %task.current_node_key, status = status.as_str(), "task suspended");
        self.set_status(task, status).await?;
        // Shared state may hold partial branch results; the cursor and the
        // step count stay put because the step did not finish.
        self.set_progress(
            task,
            &task.current_node_key,
            &task.last_action,
            shared,
            task.step_count,
        )
        .await?;
        Ok(())
    }

    /// Re-checkpoint an in-progress multi-entry node (parallel, foreach,
    /// subflow, timer, waits): persist shared state and bump the step count
    /// while keeping the cursor in place.
    pub(crate) async fn checkpoint_running(
        &self,
        task: &Task,
        curr: &str,
        shared: &Map<String, Value>,
        step_count: i64,
    ) -> Result<(), EngineError> {
        self.set_status(task, TaskStatus::Running).await?;
        self.set_progress(task, curr, "", shared, step_count).await?;
        Ok(())
    }

    async fn cancel_task(&self, task: Task) -> Result<(), EngineError> {
        let shared: Map<String, Value> = serde_json::from_str(&task.shared_json).unwrap_or_default();
        self.set_status(&task, TaskStatus::Canceled).await?;
        self.set_progress(&task, "", "canceled", &shared, task.step_count)
            .await?;
        tracing::info!(task = %task.id, node = %task.current_node_key, "task canceled");
        let mut run = self.new_run(&task, &task.current_node_key);
        run.attempt_no = 0;
        run.status = RunStatus::Canceled;
        run.action = "canceled".into();
        self.record_run(run).await;
        Ok(())
    }

    /// Fresh node-run record with bookkeeping fields filled in.
    pub(crate) fn new_run(&self, task: &Task, node_key: &str) -> NodeRun {
        let now = now_secs();
        NodeRun {
            id: String::new(),
            task_id: task.id.clone(),
            node_key: node_key.to_string(),
            attempt_no: 1,
            status: RunStatus::Ok,
            sub_status: String::new(),
            branch_id: String::new(),
            prep_json: "{}".into(),
            exec_input_json: "null".into(),
            exec_output_json: "null".into(),
            error_text: String::new(),
            action: String::new(),
            started_at: now,
            finished_at: now,
            worker_id: String::new(),
            worker_url: String::new(),
            log_path: String::new(),
        }
    }

    /// Append a node run. Losing one attempt record is tolerable; the step
    /// itself must not abort for it.
    pub(crate) async fn record_run(&self, run: NodeRun) {
        if let Err(e) = self.store.save_node_run(&run).await {
            tracing::warn!(task = %run.task_id, node = %run.node_key, error = %e, "node run not recorded");
        }
    }
}

/// Node params first, task params over them: a task can override any
/// static default from the definition.
pub(crate) fn merge_params(node: &DefNode, task_params_json: &str) -> Map<String, Value> {
    let mut params = node.params.clone();
    let task_params: Map<String, Value> = serde_json::from_str(task_params_json).unwrap_or_default();
    for (k, v) in task_params {
        params.insert(k, v);
    }
    params
}

/// Derive the node input from its prep spec. `input_map` builds a mapping
/// of resolved references (non-`$` entries are literals); `input_key`
/// resolves one reference, or falls back to a shared-state path lookup.
pub(crate) fn build_input(
    node: &DefNode,
    shared: &Map<String, Value>,
    params: &Map<String, Value>,
) -> Value {
    if let Some(map) = &node.prep.input_map {
        let mut out = Map::new();
        for (k, path) in map {
            let v = if path.starts_with('$') {
                crate::resolver::resolve_ref(path, shared, params, &Value::Null)
            } else {
                Value::String(path.clone())
            };
            out.insert(k.clone(), v);
        }
        return Value::Object(out);
    }
    if !node.prep.input_key.is_empty() {
        if node.prep.input_key.starts_with('$') {
            return crate::resolver::resolve_ref(&node.prep.input_key, shared, params, &Value::Null);
        }
        return crate::resolver::get_by_path(&Value::Object(shared.clone()), &node.prep.input_key);
    }
    Value::Null
}

/// Serialize shared state for persistence.
pub(crate) fn shared_to_json(shared: &Map<String, Value>) -> String {
    Value::Object(shared.clone()).to_string()
}

// ------------------------------------------------------------------
// `_rt` runtime-state helpers
// ------------------------------------------------------------------

/// Load the private runtime state stored under `_rt[key]`.
pub(crate) fn rt_load(shared: &Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    shared
        .get(RT_KEY)?
        .as_object()?
        .get(key)?
        .as_object()
        .cloned()
}

/// Store runtime state under `_rt[key]`.
pub(crate) fn rt_store(shared: &mut Map<String, Value>, key: &str, state: Map<String, Value>) {
    let mut rt = shared
        .get(RT_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    rt.insert(key.to_string(), Value::Object(state));
    shared.insert(RT_KEY.to_string(), Value::Object(rt));
}

/// Drop the runtime state under `_rt[key]`, removing `_rt` itself once it
/// is empty so terminal shared state carries no runner internals.
pub(crate) fn rt_clear(shared: &mut Map<String, Value>, key: &str) {
    let mut rt = shared
        .get(RT_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    rt.remove(key);
    if rt.is_empty() {
        shared.remove(RT_KEY);
    } else {
        shared.insert(RT_KEY.to_string(), Value::Object(rt));
    }
}
