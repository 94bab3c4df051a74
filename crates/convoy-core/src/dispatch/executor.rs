//! Executor seam: one callback per task kind.
//!
//! The registry is built during wiring (mutable) and read-only afterwards,
//! so dispatch needs no locks around it. Registering two executors for the
//! same kind is a wiring bug and fails fast.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::OrchestratorConfig;
use crate::domain::{AlertEvent, ExecutionOutcome, FailureKind, TaskKind, TaskRecord};
use crate::error::OrchestratorError;
use crate::ports::{EventSink, HealthProbe};
use crate::registry;
use crate::runner::TestRunner;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &TaskRecord) -> ExecutionOutcome;
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: TaskKind,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<(), OrchestratorError> {
        if self.executors.contains_key(&kind) {
            return Err(OrchestratorError::DuplicateExecutor(kind));
        }
        self.executors.insert(kind, executor);
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn TaskExecutor>> {
        self.executors.get(&kind)
    }
}

/// Stock wiring: test runner for `Test`, one-shot probe for `HealthCheck`,
/// event-emitting rollback, no-op bookkeeping for `FollowUp`.
pub fn default_registry(
    config: &OrchestratorConfig,
    probe: Arc<dyn HealthProbe>,
    events: Arc<dyn EventSink>,
) -> Result<ExecutorRegistry, OrchestratorError> {
    let mut registry = ExecutorRegistry::new();
    registry.register(TaskKind::Test, Arc::new(TestExecutor::new(config)))?;
    registry.register(
        TaskKind::HealthCheck,
        Arc::new(ProbeExecutor::new(config, probe)),
    )?;
    registry.register(TaskKind::Rollback, Arc::new(RollbackExecutor { events }))?;
    registry.register(TaskKind::FollowUp, Arc::new(NoopExecutor))?;
    Ok(registry)
}

/// Runs the full validation pass for `Test` tasks.
///
/// The app directory comes from the task payload (`app_path`) when the
/// creator knew it, otherwise from a fresh scan of the configured roots.
pub struct TestExecutor {
    config: OrchestratorConfig,
    runner: TestRunner,
}

impl TestExecutor {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            config: config.clone(),
            runner: TestRunner::new(config),
        }
    }

    fn locate(&self, task: &TaskRecord) -> Option<PathBuf> {
        if let Some(path) = task.payload.get("app_path").and_then(|v| v.as_str()) {
            return Some(PathBuf::from(path));
        }
        let report = registry::scan(&self.config.scan_roots, &self.config);
        report
            .apps
            .into_iter()
            .find(|a| a.name == task.app)
            .map(|a| a.path)
    }
}

#[async_trait]
impl TaskExecutor for TestExecutor {
    async fn execute(&self, task: &TaskRecord) -> ExecutionOutcome {
        let Some(path) = self.locate(task) else {
            return ExecutionOutcome::failed(
                FailureKind::ManifestMissing,
                json!({ "error": format!("app {} not found under any scan root", task.app) }),
            );
        };
        let descriptor = registry::describe(&path, task.app.0.clone(), &self.config);
        self.runner.run(&descriptor).await.into()
    }
}

/// One-shot liveness probe for `HealthCheck` tasks claimed by a worker.
pub struct ProbeExecutor {
    apps: Vec<crate::config::MonitoredApp>,
    timeout: std::time::Duration,
    probe: Arc<dyn HealthProbe>,
}

impl ProbeExecutor {
    pub fn new(config: &OrchestratorConfig, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            apps: config.apps.clone(),
            timeout: config.probe_timeout(),
            probe,
        }
    }
}

#[async_trait]
impl TaskExecutor for ProbeExecutor {
    async fn execute(&self, task: &TaskRecord) -> ExecutionOutcome {
        let Some(app) = self.apps.iter().find(|a| a.name == task.app) else {
            return ExecutionOutcome::failed(
                FailureKind::DependencyError,
                json!({ "error": format!("app {} has no monitored endpoint", task.app) }),
            );
        };
        match tokio::time::timeout(self.timeout, self.probe.probe(app)).await {
            Ok(Ok(())) => {
                ExecutionOutcome::passed_with(json!({ "endpoint": app.endpoint, "healthy": true }))
            }
            Ok(Err(err)) => ExecutionOutcome::failed(
                FailureKind::TestFailure,
                json!({ "endpoint": app.endpoint, "error": err }),
            ),
            Err(_) => ExecutionOutcome::failed(
                FailureKind::Timeout,
                json!({ "endpoint": app.endpoint, "error": "probe deadline exceeded" }),
            ),
        }
    }
}

/// Fires when the dispatcher decided a rollback must actually run.
///
/// The engine does not manage the serving compute, so "rolling back" means
/// emitting the structured event operators subscribe to. Swap this executor
/// to wire a real rollback.
pub struct RollbackExecutor {
    pub events: Arc<dyn EventSink>,
}

#[async_trait]
impl TaskExecutor for RollbackExecutor {
    async fn execute(&self, task: &TaskRecord) -> ExecutionOutcome {
        self.events
            .emit(AlertEvent::RollbackTriggered {
                task: task.id,
                app: task.app.clone(),
                deployment: task.deployment.clone(),
                environment: task.environment.clone(),
            })
            .await;
        tracing::warn!(app = %task.app, task = %task.id, "rollback triggered");
        ExecutionOutcome::passed_with(json!({ "rolled_back": true }))
    }
}

/// Bookkeeping kinds succeed without side effects.
pub struct NoopExecutor;

#[async_trait]
impl TaskExecutor for NoopExecutor {
    async fn execute(&self, _task: &TaskRecord) -> ExecutionOutcome {
        ExecutionOutcome::passed()
    }
}
