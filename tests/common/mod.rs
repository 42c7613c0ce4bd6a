//! Shared fixtures for the integration suite: a temp-file store, an engine
//! with a small set of local functions, and flow publishing helpers.
#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use duraflow::{Engine, SqliteStore, Task, TaskStatus};

pub async fn open_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let path = dir.path().join("test.db");
    Arc::new(SqliteStore::open(path.to_str().unwrap()).await.unwrap())
}

/// Engine with the local functions the test flows call.
pub fn test_engine(store: Arc<SqliteStore>, dir: &tempfile::TempDir) -> Engine {
    let engine = Engine::new(store).with_log_dir(dir.path().join("logs"));
    engine.register_fn("mul", |input, params| {
        let f = input.as_f64().unwrap_or(0.0);
        let m = params.get("mul").and_then(Value::as_f64).unwrap_or(1.0);
        Ok(json!(f * m))
    });
    engine.register_fn("upper", |input, params| {
        input
            .as_str()
            .or_else(|| params.get("text").and_then(Value::as_str))
            .map(|s| json!(s.to_uppercase()))
            .ok_or_else(|| "expected string input".to_string())
    });
    engine.register_fn("lower", |input, params| {
        input
            .as_str()
            .or_else(|| params.get("text").and_then(Value::as_str))
            .map(|s| json!(s.to_lowercase()))
            .ok_or_else(|| "expected string input".to_string())
    });
    engine.register_fn("route", |_input, params| {
        let action = params.get("action").and_then(Value::as_str).unwrap_or("goB");
        Ok(json!({ "action": action }))
    });
    engine.register_fn("bad", |_input, _params| Err("fail".to_string()));
    engine
}

pub async fn publish_flow(store: &Arc<SqliteStore>, def: Value) -> String {
    let flow_id = store.create_flow("test-flow", "").await.unwrap();
    store
        .create_flow_version(&flow_id, 1, &def.to_string(), "published")
        .await
        .unwrap()
}

pub async fn start_task(
    store: &Arc<SqliteStore>,
    version_id: &str,
    params: Value,
    start: &str,
) -> String {
    store
        .create_task(version_id, &params.to_string(), "", start)
        .await
        .unwrap()
}

/// Step the task until it terminates, suspends into the queue, or runs off
/// the end of the flow.
pub async fn drive(
    engine: &Engine,
    store: &Arc<SqliteStore>,
    task_id: &str,
    max_steps: usize,
) -> Task {
    for _ in 0..max_steps {
        engine.run_once(task_id).await.unwrap();
        let task = store.get_task(task_id).await.unwrap();
        if task.status.is_terminal()
            || task.status == TaskStatus::WaitingQueue
            || task.current_node_key.is_empty()
        {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} did not settle within {max_steps} steps");
}

pub fn shared_of(task: &Task) -> Map<String, Value> {
    serde_json::from_str(&task.shared_json).unwrap()
}
