//! Error types for the workflow engine.
//!
//! - [`StoreError`] — Persistence failures and conditional-update conflicts.
//! - [`ExecError`] — Errors raised while executing one unit of work.
//! - [`EngineError`] — Top-level errors for the single-step interpreter.

use thiserror::Error;

/// Persistence-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    /// The claim UPDATE of `lease_next_task` affected zero rows.
    #[error("lease conflict")]
    LeaseConflict,
    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

/// Errors produced by the executor dispatcher for a single unit of work.
///
/// Node runners branch on the variant, so the distinction between "retry",
/// "give up", and "suspend" lives here rather than in string matching.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Work was handed to the persistent queue; the task must suspend and
    /// resume once an async worker completes it.
    #[error("async work pending")]
    Pending,
    /// Structural failure (unknown function, unsupported exec type).
    /// Retrying cannot help.
    #[error("fatal: {0}")]
    Fatal(String),
    /// Ordinary execution failure, eligible for the node's retry policy.
    #[error("{0}")]
    Failed(String),
    /// A terminal error reconstituted from a previously recorded queue run.
    /// Already present as a NodeRun, and a retry would replay the same
    /// stored result, so it is neither re-recorded nor retried.
    #[error("{0}")]
    Replayed(String),
}

impl ExecError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Failed(_))
    }
}

/// Errors returned by [`Engine::run_once`](crate::engine::Engine::run_once).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The task is leased by a different owner.
    #[error("lease mismatch")]
    LeaseMismatch,
    /// Our lease on the task lapsed before the step started.
    #[error("lease expired")]
    LeaseExpired,
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("flow definition decode failed: {0}")]
    BadDefinition(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Lease errors are never retried and never mark the task failed:
    /// a healthier scheduler owns it now.
    pub fn is_lease_error(&self) -> bool {
        matches!(self, EngineError::LeaseMismatch | EngineError::LeaseExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_display() {
        assert_eq!(ExecError::Pending.to_string(), "async work pending");
        assert_eq!(
            ExecError::Fatal("no such function".into()).to_string(),
            "fatal: no such function"
        );
        assert_eq!(ExecError::Failed("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_exec_error_retryable() {
        assert!(ExecError::Failed("x".into()).is_retryable());
        assert!(!ExecError::Fatal("x".into()).is_retryable());
        assert!(!ExecError::Pending.is_retryable());
        assert!(!ExecError::Replayed("x".into()).is_retryable());
    }

    #[test]
    fn test_engine_error_lease_classification() {
        assert!(EngineError::LeaseMismatch.is_lease_error());
        assert!(EngineError::LeaseExpired.is_lease_error());
        assert!(!EngineError::NodeNotFound("n".into()).is_lease_error());
    }
}
