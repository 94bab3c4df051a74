//! Dispatcher: the concurrency backbone.
//!
//! A fixed group of workers pulls runnable tasks from the store, invokes
//! the kind-appropriate executor, and settles the result. Ordering comes
//! entirely from task dependencies; among unordered runnable tasks the
//! dispatch order is unspecified. Shutdown stops new claims and lets
//! in-flight executions finish.

pub mod executor;
pub mod retry;

pub use executor::{
    default_registry, ExecutorRegistry, NoopExecutor, ProbeExecutor, RollbackExecutor,
    TaskExecutor, TestExecutor,
};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::domain::{
    AlertEvent, ExecutionOutcome, FailureKind, TaskRecord, TaskStatus, TaskVerdict,
};
use crate::ports::{Clock, EventSink, MetricsSink, TaskStore};

/// How long an idle worker waits before re-checking for work, as a fallback
/// to the store's change notification.
const IDLE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Exit once every task is terminal. For the one-shot CLI commands.
    Drain,

    /// Keep serving until shutdown is requested. For monitor mode.
    Service,
}

/// Cheap-clone handle; workers share one inner state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn TaskStore>,
    executors: ExecutorRegistry,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    metrics: Arc<dyn MetricsSink>,
    worker_budget: usize,
    staleness: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &OrchestratorConfig,
        store: Arc<dyn TaskStore>,
        executors: ExecutorRegistry,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                executors,
                retry: RetryPolicy::from_config(&config.retry),
                clock,
                events,
                metrics,
                worker_budget: config.worker_budget.max(1),
                staleness: config.staleness_threshold(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// Startup scan: tasks left `Running` past the staleness threshold are
    /// a crashed process's leftovers and go back to the retry queue.
    pub async fn recover(&self) {
        let recovered = self.inner.store.recover_stale(self.inner.staleness).await;
        for task in &recovered {
            tracing::info!(task = %task.id, app = %task.app, "recovered stale running task");
            self.inner.metrics.incr_counter("dispatch.recovered");
        }
    }

    /// Drain the store: run until every task is terminal. Dependency
    /// cycles aside (the follow-up generator never creates one), finite
    /// retries guarantee termination.
    pub async fn run_until_idle(&self) {
        self.recover().await;
        let group = WorkerGroup::spawn(self.inner.worker_budget, self.clone(), Mode::Drain);
        group.join_all().await;
    }

    /// Start the worker group in service mode; the returned handle stops it.
    pub async fn start(&self) -> WorkerGroup {
        self.recover().await;
        WorkerGroup::spawn(self.inner.worker_budget, self.clone(), Mode::Service)
    }

    async fn worker_loop(&self, worker_id: usize, mode: Mode, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.inner.store.promote_due().await;
            self.surface_blocked().await;

            match self.inner.store.claim_runnable().await {
                Some(task) => {
                    tracing::debug!(
                        worker = worker_id,
                        task = %task.id,
                        kind = task.kind.as_str(),
                        attempt = task.attempts,
                        "claimed task"
                    );
                    self.inner.metrics.incr_counter("dispatch.claimed");
                    self.process(task).await;
                }
                None => {
                    if mode == Mode::Drain && self.inner.store.counts().await.active() == 0 {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = self.inner.store.changed() => {}
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
            }
        }
    }

    /// Pending tasks whose prerequisites were abandoned can never run;
    /// cascade the abandonment and surface every one of them.
    async fn surface_blocked(&self) {
        for task in self.inner.store.abandon_blocked().await {
            self.inner
                .metrics
                .incr_counter(&format!("task.{}.abandoned", task.kind.as_str()));
            self.inner
                .events
                .emit(AlertEvent::TaskAbandoned {
                    task: task.id,
                    app: task.app.clone(),
                    kind: task.kind,
                    error: Some("dependency abandoned".to_string()),
                })
                .await;
        }
    }

    async fn process(&self, task: TaskRecord) {
        // Conditional tasks: consult the trigger's verdict before spending
        // any work. A trigger that did not fail means skip, marked `Done`
        // without invoking the executor.
        if let Some(trigger) = task.trigger {
            match self.inner.store.get(trigger.on_failure_of).await {
                Ok(trigger_task) if trigger_task.verdict != Some(TaskVerdict::Failed) => {
                    self.inner
                        .metrics
                        .incr_counter(&format!("task.{}.skipped", task.kind.as_str()));
                    self.try_update(
                        task.id,
                        TaskStatus::Succeeded,
                        Some(json!({
                            "skipped": true,
                            "trigger": trigger.on_failure_of.to_string(),
                        })),
                    )
                    .await;
                    self.try_update(task.id, TaskStatus::Done, None).await;
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(task = %task.id, error = %err, "trigger task lookup failed");
                    self.settle(
                        task,
                        ExecutionOutcome::failed(
                            FailureKind::DependencyError,
                            json!({ "error": format!("trigger lookup failed: {err}") }),
                        ),
                    )
                    .await;
                    return;
                }
            }
        }

        let Some(executor) = self.inner.executors.get(task.kind) else {
            // Wiring bug: nothing registered for this kind. Settle the task
            // as failed so the graph still terminates, and say so loudly.
            tracing::error!(task = %task.id, kind = task.kind.as_str(), "no executor registered");
            let detail = json!({ "error": format!("no executor for kind {}", task.kind.as_str()) });
            self.try_update(task.id, TaskStatus::Failed, Some(detail)).await;
            self.try_update(task.id, TaskStatus::Done, None).await;
            return;
        };

        let outcome = executor.execute(&task).await;
        self.settle(task, outcome).await;
    }

    /// Apply the retry/settle policy for one finished attempt.
    ///
    /// - pass: `Succeeded -> Done`
    /// - manifest missing: `Failed -> Done`, no retry
    /// - test failure: retried while attempts remain, then `Failed -> Done`
    ///   with the verdict on record (a failing app is data, not an engine
    ///   failure)
    /// - transient (timeout, dependency error): retried with backoff while
    ///   attempts remain, then `Retrying -> Abandoned` and surfaced
    async fn settle(&self, task: TaskRecord, outcome: ExecutionOutcome) {
        let kind = task.kind.as_str();
        match outcome {
            ExecutionOutcome::Passed { detail } => {
                self.inner
                    .metrics
                    .incr_counter(&format!("task.{kind}.succeeded"));
                self.try_update(task.id, TaskStatus::Succeeded, detail).await;
                self.try_update(task.id, TaskStatus::Done, None).await;
            }
            ExecutionOutcome::Failed { reason, detail } => {
                self.inner.metrics.incr_counter(&format!("task.{kind}.failed"));
                self.try_update(task.id, TaskStatus::Failed, detail).await;

                let exhausted = task.attempts_exhausted();
                match reason {
                    FailureKind::ManifestMissing => {
                        self.try_update(task.id, TaskStatus::Done, None).await;
                    }
                    FailureKind::TestFailure if exhausted => {
                        self.try_update(task.id, TaskStatus::Done, None).await;
                    }
                    FailureKind::Timeout | FailureKind::DependencyError if exhausted => {
                        self.abandon(&task, reason).await;
                    }
                    _ => {
                        let delay = self.inner.retry.next_delay(task.attempts);
                        let next_run_at = self.inner.clock.now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        tracing::debug!(
                            task = %task.id,
                            attempt = task.attempts,
                            delay_ms = delay.as_millis() as u64,
                            "scheduling retry"
                        );
                        if let Err(err) = self
                            .inner
                            .store
                            .schedule_retry(task.id, next_run_at, None)
                            .await
                        {
                            tracing::error!(task = %task.id, error = %err, "retry scheduling failed");
                        }
                    }
                }
            }
        }
    }

    async fn abandon(&self, task: &TaskRecord, reason: FailureKind) {
        self.inner
            .metrics
            .incr_counter(&format!("task.{}.abandoned", task.kind.as_str()));
        // Failed -> Retrying -> Abandoned, the table's only road out.
        if let Err(err) = self
            .inner
            .store
            .schedule_retry(task.id, self.inner.clock.now(), None)
            .await
        {
            tracing::error!(task = %task.id, error = %err, "abandon transition failed");
            return;
        }
        self.try_update(task.id, TaskStatus::Abandoned, None).await;
        tracing::warn!(
            task = %task.id,
            app = %task.app,
            attempts = task.attempts,
            "task abandoned after exhausting retries"
        );
        self.inner
            .events
            .emit(AlertEvent::TaskAbandoned {
                task: task.id,
                app: task.app.clone(),
                kind: task.kind,
                error: Some(format!("{reason:?} after {} attempts", task.attempts)),
            })
            .await;
    }

    async fn try_update(
        &self,
        id: crate::domain::TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) {
        if let Err(err) = self.inner.store.update_status(id, status, result).await {
            tracing::error!(task = %id, ?status, error = %err, "status update failed");
        }
    }
}

/// Handle to a spawned worker group.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    fn spawn(n: usize, dispatcher: Dispatcher, mode: Mode) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let dispatcher = dispatcher.clone();
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id, mode, &mut rx).await;
            }));
        }
        Self { shutdown_tx, joins }
    }

    /// Stop taking new claims. In-flight executions are not cancelled.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join_all().await;
    }

    pub async fn join_all(self) {
        for join in self.joins {
            let _ = join.await;
        }
    }
}
