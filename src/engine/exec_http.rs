//! HTTP worker execution.
//!
//! Candidates come from the worker registry, optionally ordered by load,
//! and are tried in sequence. Each attempt POSTs `{input, params}` to
//! `<url>/exec/<service>` with a 10-second deadline; transport failures,
//! malformed bodies, and worker-reported errors all advance to the next
//! candidate.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::executor::{ExecInput, ExecOutcome};
use super::Engine;
use crate::error::ExecError;

const EXEC_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct WorkerReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: String,
}

impl Engine {
    pub(crate) async fn exec_http(&self, exec: &ExecInput<'_>) -> Result<ExecOutcome, ExecError> {
        let node = exec.node;
        let candidates = self
            .workers()
            .candidates(&node.service, node.weighted_by_load)
            .await
            .map_err(|e| ExecError::Failed(format!("worker lookup failed: {e}")))?;
        if candidates.is_empty() {
            return Err(ExecError::Failed("no worker".into()));
        }

        let payload = json!({ "input": exec.input, "params": exec.params });
        let mut attempts = 0;
        for worker in &candidates {
            attempts += 1;
            let endpoint = format!("{}/exec/{}", worker.url, node.service);
            let response = self
                .http()
                .post(&endpoint)
                .timeout(EXEC_DEADLINE)
                .json(&payload)
                .send()
                .await;
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(worker = %worker.id, endpoint = %endpoint, error = %e, "worker unreachable");
                    continue;
                }
            };
            let reply: WorkerReply = match response.json().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(worker = %worker.id, error = %e, "worker reply not decodable");
                    continue;
                }
            };
            if !reply.error.is_empty() {
                tracing::debug!(worker = %worker.id, error = %reply.error, "worker reported failure");
                if node.attempt_delay_millis > 0 {
                    tokio::time::sleep(Duration::from_millis(node.attempt_delay_millis as u64))
                        .await;
                }
                if node.max_attempts > 0 && attempts >= node.max_attempts {
                    break;
                }
                continue;
            }
            return Ok(ExecOutcome {
                result: reply.result,
                worker_id: worker.id.clone(),
                worker_url: worker.url.clone(),
                ..Default::default()
            });
        }
        Err(ExecError::Failed("all workers failed".into()))
    }
}
