//! Local process execution.
//!
//! Runs `script.cmd args…`, or inline `script.code` written to a temp file
//! and handed to a language-specific interpreter. Combined output is
//! captured to a per-task log file; stdout optionally parses as JSON.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::executor::{ExecInput, ExecOutcome};
use super::Engine;
use crate::error::ExecError;
use crate::model::ScriptSpec;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interpreter and file extension for inline code.
fn interpreter_for(script: &ScriptSpec) -> (String, &'static str) {
    if !script.cmd.is_empty() {
        return (script.cmd.clone(), ".sh");
    }
    match script.language.as_str() {
        "python" => ("python3".into(), ".py"),
        "javascript" | "node" => ("node".into(), ".js"),
        "" => ("bash".into(), ".sh"),
        other => (other.to_string(), ".sh"),
    }
}

impl Engine {
    pub(crate) async fn exec_local_script(
        &self,
        exec: &ExecInput<'_>,
    ) -> Result<ExecOutcome, ExecError> {
        let node = exec.node;
        let script = &node.script;
        if script.cmd.is_empty() && script.code.is_empty() {
            return Err(ExecError::Fatal("script has neither cmd nor code".into()));
        }
        let timeout = if script.timeout_millis > 0 {
            Duration::from_millis(script.timeout_millis as u64)
        } else {
            DEFAULT_TIMEOUT
        };

        let mut attempts = 0;
        loop {
            attempts += 1;

            let mut temp_file: Option<PathBuf> = None;
            let (program, args) = if script.code.is_empty() {
                (script.cmd.clone(), script.args.clone())
            } else {
                let (interp, ext) = interpreter_for(script);
                let path = std::env::temp_dir().join(format!(
                    "duraflow-script-{}{ext}",
                    crate::store::gen_id("s")
                ));
                if let Err(e) = tokio::fs::write(&path, &script.code).await {
                    return Err(ExecError::Failed(format!("script temp file: {e}")));
                }
                let mut args = vec![path.to_string_lossy().into_owned()];
                args.extend(script.args.iter().cloned());
                temp_file = Some(path);
                (interp, args)
            };

            let mut cmd = Command::new(&program);
            cmd.args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if !script.work_dir.is_empty() {
                cmd.current_dir(&script.work_dir);
            }
            for (k, v) in &script.env {
                cmd.env(k, v);
            }
            if script.stdin_mode == "json" {
                cmd.stdin(Stdio::piped());
            } else {
                cmd.stdin(Stdio::null());
            }

            let outcome = run_child(cmd, script, exec, timeout).await;
            if let Some(path) = temp_file {
                let _ = tokio::fs::remove_file(path).await;
            }

            let (combined, succeeded) = match outcome {
                Ok((combined, succeeded)) => (combined, succeeded),
                Err(e) => (e.into_bytes(), false),
            };

            let log_path = self
                .write_script_log(&exec.task.id, exec.node_key, attempts, &combined)
                .await;

            if !succeeded {
                if node.attempt_delay_millis > 0 {
                    tokio::time::sleep(Duration::from_millis(node.attempt_delay_millis as u64))
                        .await;
                }
                if node.max_attempts == 0 || attempts >= node.max_attempts {
                    return Err(ExecError::Failed("script failed".into()));
                }
                continue;
            }

            let raw = String::from_utf8_lossy(&combined).into_owned();
            let result = if script.output_mode == "json" {
                serde_json::from_str::<Value>(raw.trim()).unwrap_or(Value::String(raw))
            } else {
                Value::String(raw)
            };
            return Ok(ExecOutcome {
                result,
                worker_id: format!("local-script:{program}"),
                worker_url: "local".into(),
                log_path,
                ..Default::default()
            });
        }
    }

    async fn write_script_log(
        &self,
        task_id: &str,
        node_key: &str,
        attempt: i64,
        combined: &[u8],
    ) -> String {
        let dir = self.log_dir().join("tasks").join(task_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(task = %task_id, error = %e, "script log dir not created");
            return String::new();
        }
        let path = dir.join(format!("{node_key}_{attempt}.log"));
        if let Err(e) = tokio::fs::write(&path, combined).await {
            tracing::warn!(task = %task_id, error = %e, "script log not written");
            return String::new();
        }
        path.to_string_lossy().into_owned()
    }
}

/// Spawn the child, feed stdin when asked, and collect combined output.
/// Returns `(combined_output, exit_ok)`; the error case carries a message
/// in place of output.
async fn run_child(
    mut cmd: Command,
    script: &ScriptSpec,
    exec: &ExecInput<'_>,
    timeout: Duration,
) -> Result<(Vec<u8>, bool), String> {
    let mut child = cmd.spawn().map_err(|e| format!("spawn failed: {e}"))?;
    if script.stdin_mode == "json" {
        if let Some(mut stdin) = child.stdin.take() {
            let payload = json!({ "input": exec.input, "params": exec.params }).to_string();
            let _ = stdin.write_all(payload.as_bytes()).await;
        }
    }
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            Ok((combined, output.status.success()))
        }
        Ok(Err(e)) => Err(format!("wait failed: {e}")),
        // kill_on_drop reaps the child when the timeout drops the future.
        Err(_) => Err("script timed out".into()),
    }
}
