//! Error taxonomy for the orchestration engine.
//!
//! Only engine failures live here. App-level verdicts (failing tests,
//! missing manifests) are carried as data in task result payloads.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{TaskId, TaskKind, TaskStatus};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Reference to a task the store has never seen. A programming-contract
    /// violation: surfaced to the caller, never retried.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// Attempted status change outside the legal-transition table.
    #[error("invalid transition for task {task}: {from:?} -> {to:?}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Two executors registered for the same task kind.
    #[error("duplicate executor for task kind {0:?}")]
    DuplicateExecutor(TaskKind),

    /// No executor registered for a claimed task's kind.
    #[error("no executor registered for task kind {0:?}")]
    ExecutorNotFound(TaskKind),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file failed to parse. Includes the path for context.
    #[error("failed to parse config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Store snapshot failed to read or write.
    #[error("task store snapshot error at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
