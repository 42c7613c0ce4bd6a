//! Node-runner polymorphism: one runner per node kind, dispatched by the
//! engine over the definition's `kind` tag.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::nodes;
use super::Engine;
use crate::error::EngineError;
use crate::model::{DefNode, FlowDef};
use crate::store::Task;

/// Everything one node visit needs: the task snapshot, the pinned flow
/// definition, the node under the cursor, and its derived shared/params/
/// input views.
pub struct StepContext {
    pub task: Task,
    pub def: FlowDef,
    pub node: DefNode,
    pub node_key: String,
    pub shared: Map<String, Value>,
    pub params: Map<String, Value>,
    pub input: Value,
}

/// Trait for node execution. Each node kind implements this; a runner
/// performs exactly one visit and commits its outcome through the engine's
/// owned-write helpers.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(&self, engine: &Engine, step: StepContext) -> Result<(), EngineError>;
}

/// Registry of node runners keyed by kind.
pub struct NodeRunnerRegistry {
    runners: HashMap<&'static str, Box<dyn NodeRunner>>,
}

impl NodeRunnerRegistry {
    pub fn empty() -> Self {
        NodeRunnerRegistry {
            runners: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = NodeRunnerRegistry::empty();
        registry.register("executor", Box::new(nodes::ExecutorRunner));
        registry.register("choice", Box::new(nodes::ChoiceRunner));
        registry.register("parallel", Box::new(nodes::ParallelRunner));
        registry.register("foreach", Box::new(nodes::ForeachRunner));
        registry.register("subflow", Box::new(nodes::SubflowRunner));
        registry.register("timer", Box::new(nodes::TimerRunner));
        registry.register("wait_event", Box::new(nodes::WaitEventRunner));
        registry.register("approval", Box::new(nodes::ApprovalRunner));
        registry
    }

    pub fn register(&mut self, kind: &'static str, runner: Box<dyn NodeRunner>) {
        self.runners.insert(kind, runner);
    }

    pub fn get(&self, kind: &str) -> Option<&dyn NodeRunner> {
        self.runners.get(kind).map(|r| r.as_ref())
    }
}

impl Default for NodeRunnerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_every_kind() {
        let registry = NodeRunnerRegistry::with_builtins();
        for kind in [
            "executor",
            "choice",
            "parallel",
            "foreach",
            "subflow",
            "timer",
            "wait_event",
            "approval",
        ] {
            assert!(registry.get(kind).is_some(), "missing runner for {kind}");
        }
        assert!(registry.get("nope").is_none());
    }
}
