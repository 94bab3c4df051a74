//! Task record: the single source of truth for one unit of orchestration work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::descriptor::{AppName, DeploymentId};
use super::ids::TaskId;
use super::state::TaskStatus;

/// What a task does when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run an app's validation pass (dependency resolution + test command).
    Test,

    /// Bookkeeping task grouping a deployment's follow-up batch.
    FollowUp,

    /// One-shot liveness probe of a deployed app.
    HealthCheck,

    /// Conditional task: executed only when its trigger task failed,
    /// skipped (marked `Done` without execution) when it succeeded.
    Rollback,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Test => "test",
            TaskKind::FollowUp => "follow_up",
            TaskKind::HealthCheck => "health_check",
            TaskKind::Rollback => "rollback",
        }
    }
}

/// Final verdict of a settled task, kept separately from `status` so a
/// `Done` task still tells downstream conditional tasks how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVerdict {
    Passed,
    Failed,
}

/// "Run only if task X failed." Dependencies alone express ordering; this
/// is the one extra bit the dispatcher consults to decide execute-vs-skip,
/// which keeps the dependency model a pure partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCondition {
    /// The task whose outcome gates execution.
    pub on_failure_of: TaskId,
}

/// Parameters for creating a task. The store assigns id, status, timestamps
/// and the attempt counter.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: TaskKind,
    pub app: AppName,
    pub deployment: Option<DeploymentId>,
    pub environment: Option<String>,
    pub depends_on: Vec<TaskId>,
    pub trigger: Option<TriggerCondition>,
    pub max_attempts: u32,
    /// Kind-specific input (app path, probe endpoint, ...).
    pub payload: serde_json::Value,
}

impl NewTask {
    pub fn new(kind: TaskKind, app: AppName, max_attempts: u32) -> Self {
        Self {
            kind,
            app,
            deployment: None,
            environment: None,
            depends_on: Vec::new(),
            trigger: None,
            max_attempts,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_deployment(mut self, deployment: DeploymentId, environment: &str) -> Self {
        self.deployment = Some(deployment);
        self.environment = Some(environment.to_string());
        self
    }

    pub fn depends_on(mut self, dep: TaskId) -> Self {
        self.depends_on.push(dep);
        self
    }

    pub fn triggered_by_failure_of(mut self, task: TaskId) -> Self {
        self.trigger = Some(TriggerCondition { on_failure_of: task });
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A task in the store.
///
/// Mutated only through the methods below so every change lands on a legal
/// transition edge and refreshes `updated_at`. The store persists this type
/// verbatim in its snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub app: AppName,
    pub deployment: Option<DeploymentId>,
    pub environment: Option<String>,
    pub status: TaskStatus,
    pub verdict: Option<TaskVerdict>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub depends_on: Vec<TaskId>,
    pub trigger: Option<TriggerCondition>,
    /// Result payload of the last attempt: log excerpt, exit code, probe
    /// snapshot. Free-form by design.
    pub result: Option<serde_json::Value>,
    /// Kind-specific input captured at creation.
    pub payload: serde_json::Value,
    /// Backoff deadline while `Retrying`.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn create(id: TaskId, spec: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: spec.kind,
            app: spec.app,
            deployment: spec.deployment,
            environment: spec.environment,
            status: TaskStatus::Pending,
            verdict: None,
            attempts: 0,
            max_attempts: spec.max_attempts,
            depends_on: spec.depends_on,
            trigger: spec.trigger,
            result: None,
            payload: spec.payload,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claim for execution. The attempt counter increments here and only
    /// here; crash recovery re-queues without a second increment.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.updated_at = now;
    }

    pub fn mark_succeeded(&mut self, result: Option<serde_json::Value>, now: DateTime<Utc>) {
        self.status = TaskStatus::Succeeded;
        self.verdict = Some(TaskVerdict::Passed);
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, result: Option<serde_json::Value>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.verdict = Some(TaskVerdict::Failed);
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = now;
    }

    pub fn finalize(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Done;
        self.next_run_at = None;
        self.updated_at = now;
    }

    pub fn schedule_retry(&mut self, next_run_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = TaskStatus::Retrying;
        self.next_run_at = Some(next_run_at);
        self.updated_at = now;
    }

    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.next_run_at = None;
        self.updated_at = now;
    }

    pub fn abandon(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Abandoned;
        self.next_run_at = None;
        self.updated_at = now;
    }

    /// True when the last attempt was the final allowed one.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
