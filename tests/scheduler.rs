//! Scheduler loop behavior: lease claiming, driving to completion, and
//! fencing between competing owners.

mod common;

use common::{open_store, publish_flow, shared_of, start_task, test_engine};
use serde_json::json;
use std::sync::Arc;

use duraflow::{Scheduler, TaskStatus};

#[tokio::test]
async fn scheduler_drives_leased_task_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = Arc::new(test_engine(store.clone(), &dir).with_owner("sched-1"));

    let def = json!({
        "start": "a",
        "nodes": {
            "a": {
                "kind": "executor", "exec_type": "local_func", "func": "upper",
                "prep": {"input_key": "$params.text"},
                "post": {"output_key": "result", "action_static": "next"}
            },
            "b": {
                "kind": "executor", "exec_type": "local_func", "func": "lower",
                "prep": {"input_key": "$shared.result"},
                "post": {"output_key": "lowered"}
            }
        },
        "edges": [{"from": "a", "action": "next", "to": "b"}]
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"text": "MiXeD"}), "a").await;

    let task = store.lease_next_task("sched-1", 30).await.unwrap().unwrap();
    assert_eq!(task.id, tid);

    let scheduler = Scheduler::new(store.clone(), engine, 30);
    scheduler.drive_task(&tid).await;

    let task = store.get_task(&tid).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.step_count, 2);
    let shared = shared_of(&task);
    assert_eq!(shared.get("result"), Some(&json!("MIXED")));
    assert_eq!(shared.get("lowered"), Some(&json!("mixed")));
}

#[tokio::test]
async fn fenced_out_scheduler_leaves_task_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = Arc::new(test_engine(store.clone(), &dir).with_owner("sched-slow"));

    let def = json!({
        "start": "a",
        "nodes": {"a": {"kind": "executor", "exec_type": "local_func", "func": "upper",
                         "prep": {"input_key": "$params.text"}}},
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"text": "x"}), "a").await;

    // Another scheduler holds the live lease.
    store.lease_next_task("sched-fast", 30).await.unwrap().unwrap();

    let scheduler = Scheduler::new(store.clone(), engine, 30);
    scheduler.drive_task(&tid).await;

    // The fenced-out scheduler must not have marked the task failed; the
    // live owner still sees it running.
    let task = store.get_task(&tid).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.lease_owner, "sched-fast");
    assert_eq!(task.step_count, 0);
}
