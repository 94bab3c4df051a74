//! Task store port: the single shared mutable resource of the engine.
//!
//! All task mutation goes through this trait; no component touches record
//! fields of a stored task directly. Implementations must make each
//! operation atomic per task id (no lost updates) and keep `list_runnable`
//! globally consistent: a `Running` task is never handed out again.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{DeploymentId, NewTask, TaskId, TaskRecord, TaskStatus};
use crate::error::OrchestratorError;

/// Per-status counts, for metrics and drain detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retrying: usize,
    pub done: usize,
    pub abandoned: usize,
}

impl TaskCounts {
    /// Tasks that still need dispatcher attention.
    pub fn active(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.retrying
    }

    pub fn total(&self) -> usize {
        self.active() + self.done + self.abandoned
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task: fresh id, `Pending`, zero attempts.
    async fn create(&self, spec: NewTask) -> Result<TaskRecord, OrchestratorError>;

    /// Fetch by id. `NotFound` for unknown ids.
    async fn get(&self, id: TaskId) -> Result<TaskRecord, OrchestratorError>;

    /// Apply a status change, enforcing the legal-transition table.
    /// A `Some` result payload replaces the record's payload.
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<TaskRecord, OrchestratorError>;

    /// The `Failed -> Retrying` edge with its backoff deadline.
    async fn schedule_retry(
        &self,
        id: TaskId,
        next_run_at: chrono::DateTime<chrono::Utc>,
        result: Option<serde_json::Value>,
    ) -> Result<TaskRecord, OrchestratorError>;

    /// `Pending` tasks whose dependencies are all `Succeeded`/`Done`.
    async fn list_runnable(&self) -> Vec<TaskRecord>;

    /// Every task tagged with this deployment, in creation order.
    async fn list_by_deployment(&self, deployment: &DeploymentId) -> Vec<TaskRecord>;

    /// Atomically pop one runnable task and transition it to `Running`,
    /// incrementing its attempt counter. The only claim path: two workers
    /// can never receive the same task.
    async fn claim_runnable(&self) -> Option<TaskRecord>;

    /// Move `Retrying` tasks whose backoff deadline has passed back to
    /// `Pending`. Returns how many were promoted.
    async fn promote_due(&self) -> usize;

    /// Crash recovery: `Running` tasks whose last update is older than
    /// `staleness` move to `Retrying` (due immediately) without a second
    /// attempt increment.
    async fn recover_stale(&self, staleness: Duration) -> Vec<TaskRecord>;

    /// Dependency cascade: `Pending` tasks with an `Abandoned` dependency
    /// can never run; abandon them too and return them for surfacing.
    async fn abandon_blocked(&self) -> Vec<TaskRecord>;

    async fn counts(&self) -> TaskCounts;

    /// Everything, in creation order. For summaries and snapshots.
    async fn list_all(&self) -> Vec<TaskRecord>;

    /// Wait until the store's contents may have changed. A wakeup hint for
    /// dispatch loops; spurious returns are fine. The default is a short
    /// poll for implementations without push notification.
    async fn changed(&self) {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
