//! Executor dispatch scenarios that need real collaborators: HTTP workers
//! on loopback sockets and local script processes.

mod common;

use common::{drive, open_store, publish_flow, shared_of, start_task, test_engine};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use duraflow::{SqliteStore, TaskStatus, WorkerInfo};

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn serve_exec(mut sock: TcpStream, body: String) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let header_end = loop {
        match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                    break pos + 4;
                }
            }
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = sock.write_all(response.as_bytes()).await;
    let _ = sock.flush().await;
}

/// Minimal worker speaking the `/exec/<service>` contract: every request
/// gets `{"result": <reply>}` back.
async fn spawn_worker(reply: Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((sock, _)) = listener.accept().await else {
                break;
            };
            let body = json!({ "result": reply }).to_string();
            tokio::spawn(serve_exec(sock, body));
        }
    });
    format!("http://{addr}")
}

async fn register(store: &Arc<SqliteStore>, id: &str, url: &str, load: i64) {
    store
        .register_worker(&WorkerInfo {
            id: id.into(),
            url: url.into(),
            services: vec!["transform".into()],
            load,
            last_heartbeat: 0,
            status: "online".into(),
            kind: "http".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn weighted_dispatch_prefers_idle_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    // The busy worker registers first so plain insertion order would pick
    // it; load weighting must override that.
    let busy_url = spawn_worker(json!("from-busy")).await;
    let idle_url = spawn_worker(json!("from-idle")).await;
    register(&store, "w-busy", &busy_url, 10).await;
    register(&store, "w-idle", &idle_url, 0).await;

    let def = json!({
        "start": "n",
        "nodes": {
            "n": {
                "kind": "executor", "service": "transform",
                "weighted_by_load": true,
                "prep": {"input_key": "$params.val"},
                "post": {"output_key": "out"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"val": 1.0}), "n").await;
    let task = drive(&engine, &store, &tid, 5).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(shared_of(&task).get("out"), Some(&json!("from-idle")));
    let runs = store.list_node_runs(&tid).await.unwrap();
    assert_eq!(runs[0].worker_id, "w-idle");
}

#[tokio::test]
async fn http_dispatch_falls_through_dead_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    // First candidate is unreachable; the walk must reach the live one.
    register(&store, "w-dead", "http://127.0.0.1:1", 0).await;
    let live_url = spawn_worker(json!("alive")).await;
    register(&store, "w-live", &live_url, 5).await;

    let def = json!({
        "start": "n",
        "nodes": {
            "n": {
                "kind": "executor", "service": "transform",
                "post": {"output_key": "out"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({}), "n").await;
    let task = drive(&engine, &store, &tid, 5).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(shared_of(&task).get("out"), Some(&json!("alive")));
}

#[tokio::test]
async fn http_dispatch_with_no_workers_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "n",
        "nodes": {"n": {"kind": "executor", "service": "transform"}},
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({}), "n").await;
    let task = drive(&engine, &store, &tid, 5).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let runs = store.list_node_runs(&tid).await.unwrap();
    assert_eq!(runs.last().unwrap().error_text, "no worker");
}

#[tokio::test]
async fn local_script_captures_output_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "s",
        "nodes": {
            "s": {
                "kind": "executor", "exec_type": "local_script",
                "script": {"cmd": "sh", "args": ["-c", "echo run-output"]},
                "post": {"output_key": "out"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({}), "s").await;
    let task = drive(&engine, &store, &tid, 5).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(shared_of(&task).get("out"), Some(&json!("run-output\n")));

    let runs = store.list_node_runs(&tid).await.unwrap();
    let log_path = &runs[0].log_path;
    assert!(!log_path.is_empty());
    let logged = tokio::fs::read_to_string(log_path).await.unwrap();
    assert_eq!(logged, "run-output\n");
}

#[tokio::test]
async fn local_script_json_stdin_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    // `cat` echoes the stdin payload; json output mode decodes it back.
    let def = json!({
        "start": "s",
        "nodes": {
            "s": {
                "kind": "executor", "exec_type": "local_script",
                "script": {"cmd": "cat", "stdin_mode": "json", "output_mode": "json"},
                "prep": {"input_key": "$params.v"},
                "post": {"output_key": "echoed"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({"v": 41}), "s").await;
    let task = drive(&engine, &store, &tid, 5).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let echoed = shared_of(&task).get("echoed").cloned().unwrap();
    assert_eq!(echoed.get("input"), Some(&json!(41)));
    assert_eq!(echoed.get("params").and_then(|p| p.get("v")), Some(&json!(41)));
}

#[tokio::test]
async fn local_script_inline_code_runs_under_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "s",
        "nodes": {
            "s": {
                "kind": "executor", "exec_type": "local_script",
                "script": {"cmd": "sh", "code": "echo inline-ran", "output_mode": "raw"},
                "post": {"output_key": "out"}
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({}), "s").await;
    let task = drive(&engine, &store, &tid, 5).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(shared_of(&task).get("out"), Some(&json!("inline-ran\n")));
}

#[tokio::test]
async fn failing_script_exhausts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = test_engine(store.clone(), &dir);

    let def = json!({
        "start": "s",
        "nodes": {
            "s": {
                "kind": "executor", "exec_type": "local_script",
                "script": {"cmd": "sh", "args": ["-c", "exit 3"]},
                "max_attempts": 2
            }
        },
        "edges": []
    });
    let vid = publish_flow(&store, def).await;
    let tid = start_task(&store, &vid, json!({}), "s").await;
    let task = drive(&engine, &store, &tid, 5).await;
    assert_eq!(task.status, TaskStatus::Failed);
}
