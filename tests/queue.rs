//! Queue bridge scenarios: suspension, async completion, and resumption.

mod common;

use common::{drive, open_store, publish_flow, shared_of, start_task, test_engine};
use serde_json::json;

use duraflow::queue::{complete_queue_work, fail_queue_work, poll_queue_work, run_id_of, QueueWorker};
use duraflow::{RunStatus, TaskStatus};

#[tokio::test]
async fn queue_executor_suspends_then_resumes_without_reenqueue() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "q",
        "nodes": {
            "q": {
                "kind": "executor", "exec_type": "queue", "service": "embed",
                "prep": {"input_key": "$params.doc"},
                "post": {"output_key": "out"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"doc": "text"}), "q").await;

    // First step: the work is enqueued and the task suspends.
    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::WaitingQueue);
    assert_eq!(task.current_node_key, "q");

    let runs = store.list_node_runs(&tid).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Queued);

    // An async worker claims the item and completes it.
    let item = poll_queue_work(&store, "w-async", &["embed".to_string()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.node_key, "q");
    let run_id = run_id_of(&item).unwrap();
    assert_eq!(run_id, runs[0].id);
    let resumed = complete_queue_work(&store, &item.id, &run_id, &json!({"v": 7}), "", "w-async")
        .await
        .unwrap();
    assert_eq!(resumed, tid);
    assert_eq!(store.get_task(&tid).await.unwrap().status, TaskStatus::Pending);

    // Next pass finalizes the node from the stored run.
    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(shared_of(&task).get("out"), Some(&json!({"v": 7})));

    // Exactly one queue item and one node run: nothing re-enqueued, no
    // duplicate logging of the replayed result.
    assert_eq!(store.count_queue_items(&tid).await.unwrap(), 1);
    let runs = store.list_node_runs(&tid).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Ok);
    assert_eq!(runs[0].worker_id, "w-async");
}

#[tokio::test]
async fn queue_failure_surfaces_stored_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "q",
        "nodes": {
            "q": {
                "kind": "executor", "exec_type": "queue", "service": "embed",
                "max_retries": 3
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({}), "q").await;

    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::WaitingQueue);

    let item = poll_queue_work(&store, "w-async", &["embed".to_string()])
        .await
        .unwrap()
        .unwrap();
    let run_id = run_id_of(&item).unwrap();
    fail_queue_work(&store, &item.id, &run_id, "model exploded", "", "w-async")
        .await
        .unwrap();

    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::Failed);

    // The stored error is terminal despite max_retries: retrying would
    // only replay the same recorded outcome.
    let runs = store.list_node_runs(&tid).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Error);
    assert_eq!(runs[0].error_text, "model exploded");
    assert_eq!(store.count_queue_items(&tid).await.unwrap(), 1);
}

#[tokio::test]
async fn queue_worker_harness_processes_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "q",
        "nodes": {
            "q": {
                "kind": "executor", "exec_type": "queue", "service": "shout",
                "prep": {"input_key": "$params.text"},
                "post": {"output_key": "out"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"text": "quiet"}), "q").await;
    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::WaitingQueue);

    let mut worker = QueueWorker::new(store.clone(), "w-shout");
    worker.handle(
        "shout",
        std::sync::Arc::new(Shout),
    );
    worker.register().await.unwrap();

    // One poll handles the item; the next finds the queue drained.
    assert!(worker.poll_once().await.unwrap());
    assert!(!worker.poll_once().await.unwrap());

    // The worker shows up in the registry as an async poller, invisible to
    // HTTP dispatch.
    assert_eq!(store.list_workers("shout", 15, false).await.unwrap().len(), 1);
    assert!(store.list_workers("shout", 15, true).await.unwrap().is_empty());

    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(shared_of(&task).get("out"), Some(&json!("QUIET")));
}

struct Shout;

#[async_trait::async_trait]
impl duraflow::LocalFunc for Shout {
    async fn call(
        &self,
        input: serde_json::Value,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, String> {
        input
            .as_str()
            .map(|s| json!(s.to_uppercase()))
            .ok_or_else(|| "expected string".to_string())
    }
}

#[tokio::test]
async fn parallel_queued_branches_resume_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "p",
        "nodes": {
            "p": {
                "kind": "parallel",
                "parallel_mode": "concurrent",
                "parallel_execs": [
                    {"service": "embed", "exec_type": "queue"},
                    {"service": "rank", "exec_type": "queue"}
                ],
                "prep": {"input_key": "$params.doc"},
                "post": {"output_key": "agg", "action_static": "next"}
            }
        },
        "edges": [{"from": "p", "action": "next", "to": ""}]
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"doc": "text"}), "p").await;

    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::WaitingQueue);

    // Two queued runs under one node key, distinguished by branch.
    let runs = store.list_node_runs(&tid).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Queued));

    // Complete both branches out of order.
    let rank_item = poll_queue_work(&store, "w-rank", &["rank".to_string()])
        .await
        .unwrap()
        .unwrap();
    complete_queue_work(
        &store,
        &rank_item.id,
        &run_id_of(&rank_item).unwrap(),
        &json!("rank-result"),
        "",
        "w-rank",
    )
    .await
    .unwrap();

    // One branch done, one still queued: the task suspends again.
    let task = drive(&engine, &store, &tid, 3).await;
    assert_eq!(task.status, TaskStatus::WaitingQueue);

    let embed_item = poll_queue_work(&store, "w-embed", &["embed".to_string()])
        .await
        .unwrap()
        .unwrap();
    complete_queue_work(
        &store,
        &embed_item.id,
        &run_id_of(&embed_item).unwrap(),
        &json!("embed-result"),
        "",
        "w-embed",
    )
    .await
    .unwrap();

    let task = drive(&engine, &store, &tid, 5).await;
    assert_eq!(task.status, TaskStatus::Completed);
    // Aggregation mirrors declared service order, not completion order.
    assert_eq!(
        shared_of(&task).get("agg"),
        Some(&json!(["embed-result", "rank-result"]))
    );
    assert_eq!(store.count_queue_items(&tid).await.unwrap(), 2);
}
