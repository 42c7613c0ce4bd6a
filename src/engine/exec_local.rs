//! In-process function execution.
//!
//! Local functions cover lightweight work that does not warrant a worker
//! service. They are registered once at startup under a name the flow
//! definition references via `func`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use super::executor::{ExecInput, ExecOutcome};
use super::Engine;
use crate::error::ExecError;

/// A registered in-process function.
#[async_trait]
pub trait LocalFunc: Send + Sync {
    async fn call(&self, input: Value, params: &Map<String, Value>) -> Result<Value, String>;
}

/// Adapter turning a plain closure into a [`LocalFunc`].
pub(crate) struct FnFunc<F>(pub F);

#[async_trait]
impl<F> LocalFunc for FnFunc<F>
where
    F: Fn(Value, &Map<String, Value>) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, input: Value, params: &Map<String, Value>) -> Result<Value, String> {
        (self.0)(input, params)
    }
}

impl Engine {
    /// Invoke the function registered under `node.func`, obeying the inner
    /// attempt policy. A missing function is structural and never retried.
    pub(crate) async fn exec_local_func(
        &self,
        exec: &ExecInput<'_>,
    ) -> Result<ExecOutcome, ExecError> {
        let name = &exec.node.func;
        let Some(func) = self.local_func(name) else {
            return Err(ExecError::Fatal(format!("unknown local function: {name}")));
        };
        let worker_id = format!("local-func:{name}");
        let mut attempts = 0;
        let mut last_err = String::new();
        loop {
            attempts += 1;
            let call = func.call(exec.input.clone(), exec.params);
            match tokio::time::timeout(Duration::from_secs(10), call).await {
                Ok(Ok(result)) => {
                    return Ok(ExecOutcome {
                        result,
                        worker_id,
                        worker_url: "local".into(),
                        ..Default::default()
                    });
                }
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = "local function timed out".into(),
            }
            if exec.node.attempt_delay_millis > 0 {
                tokio::time::sleep(Duration::from_millis(exec.node.attempt_delay_millis as u64))
                    .await;
            }
            if exec.node.max_attempts == 0 || attempts >= exec.node.max_attempts {
                break;
            }
        }
        Err(ExecError::Failed(format!(
            "local function {name} failed: {last_err}"
        )))
    }
}
