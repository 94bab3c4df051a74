//! Tick-driven health scheduler.
//!
//! `tick` is invoked by an external timer (the monitor loop) with an
//! explicit timestamp, never from an internal sleeping loop, so the whole
//! scheduler is testable with synthetic clocks. Each tick probes every
//! monitored app under the per-probe timeout, rolls the per-app
//! `HealthRecord`, and on a threshold crossing drives a failed
//! `HealthCheck` task into the store so any waiting rollback fires.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::{MonitoredApp, OrchestratorConfig};
use crate::domain::{
    AlertEvent, AppName, HealthCheckOutcome, HealthRecord, NewTask, TaskKind, TaskRecord,
    TaskStatus,
};
use crate::error::OrchestratorError;
use crate::ports::{EventSink, HealthProbe, MetricsSink, TaskStore};

pub struct HealthScheduler {
    apps: Vec<MonitoredApp>,
    probe_timeout: std::time::Duration,
    failure_threshold: u32,
    max_attempts: u32,
    probe: Arc<dyn HealthProbe>,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
    metrics: Arc<dyn MetricsSink>,
    records: Mutex<HashMap<AppName, HealthRecord>>,
}

impl HealthScheduler {
    pub fn new(
        config: &OrchestratorConfig,
        probe: Arc<dyn HealthProbe>,
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            apps: config.apps.clone(),
            probe_timeout: config.probe_timeout(),
            failure_threshold: config.health.failure_threshold,
            max_attempts: config.retry.max_attempts,
            probe,
            store,
            events,
            metrics,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Read-only view of the rolling records, sorted by app name.
    pub async fn records(&self) -> Vec<HealthRecord> {
        let records = self.records.lock().await;
        let mut out: Vec<HealthRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.app.cmp(&b.app));
        out
    }

    /// Probe the fleet once.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<HealthCheckOutcome> {
        let mut outcomes = Vec::with_capacity(self.apps.len());
        for app in self.apps.clone() {
            outcomes.push(self.check_one(&app, now).await);
        }
        outcomes
    }

    async fn check_one(&self, app: &MonitoredApp, now: DateTime<Utc>) -> HealthCheckOutcome {
        // A probe slower than its deadline is a failure, never a hang.
        let result = match tokio::time::timeout(self.probe_timeout, self.probe.probe(app)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(format!(
                "probe exceeded {}ms deadline",
                self.probe_timeout.as_millis()
            )),
        };

        let (failures, breached) = {
            let mut records = self.records.lock().await;
            let record = records
                .entry(app.name.clone())
                .or_insert_with(|| HealthRecord::unknown(app.name.clone()));
            match &result {
                Ok(()) => record.record_success(now),
                Err(_) => record.record_failure(now),
            }
            let failures = record.consecutive_failures;
            // Alert on the crossing itself, not on every tick past it.
            (failures, failures == self.failure_threshold)
        };

        self.metrics.set_gauge(
            &format!("health.{}.failure_streak", app.name),
            u64::from(failures),
        );
        match &result {
            Ok(()) => self.metrics.incr_counter("health.probe.success"),
            Err(_) => self.metrics.incr_counter("health.probe.failure"),
        }

        if let Err(err) = &result {
            tracing::warn!(app = %app.name, error = %err, failures, "health probe failed");
        }

        if breached {
            self.events
                .emit(AlertEvent::HealthThresholdBreached {
                    app: app.name.clone(),
                    consecutive_failures: failures,
                })
                .await;
            if let Err(store_err) = self
                .record_failed_check(app, result.as_ref().err().cloned())
                .await
            {
                tracing::error!(
                    app = %app.name,
                    error = %store_err,
                    "failed to record health-check failure task"
                );
            }
        }

        HealthCheckOutcome {
            app: app.name.clone(),
            healthy: result.is_ok(),
            error: result.err(),
            consecutive_failures: failures,
            threshold_breached: breached,
        }
    }

    /// Settle a `HealthCheck` task as failed so a rollback waiting on it
    /// becomes runnable. Prefers an existing live task for the app (a
    /// follow-up batch member); creates a fresh one otherwise. The task is
    /// driven through `Failed` to `Done` so its verdict is final and its
    /// dependents unblock.
    async fn record_failed_check(
        &self,
        app: &MonitoredApp,
        error: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let payload = serde_json::json!({
            "app": app.name.0,
            "probe_error": error,
            "consecutive_failures": self.failure_threshold,
        });

        let candidate = self.find_live_check(&app.name).await;
        let (id, status) = match candidate {
            Some(task) => (task.id, task.status),
            None => {
                let task = self
                    .store
                    .create(
                        NewTask::new(TaskKind::HealthCheck, app.name.clone(), self.max_attempts)
                            .with_payload(payload.clone()),
                    )
                    .await?;
                (task.id, task.status)
            }
        };

        if status == TaskStatus::Pending {
            self.store
                .update_status(id, TaskStatus::Running, None)
                .await?;
        }
        self.store
            .update_status(id, TaskStatus::Failed, Some(payload))
            .await?;
        self.store.update_status(id, TaskStatus::Done, None).await?;
        Ok(())
    }

    /// A `HealthCheck` task for this app that can be settled right now:
    /// either already `Running`, or `Pending` with its dependencies met.
    /// A dependency-blocked one is left alone.
    async fn find_live_check(&self, app: &AppName) -> Option<TaskRecord> {
        let all = self.store.list_all().await;
        if let Some(running) = all
            .iter()
            .find(|t| t.kind == TaskKind::HealthCheck && &t.app == app && t.status == TaskStatus::Running)
        {
            return Some(running.clone());
        }
        let runnable = self.store.list_runnable().await;
        runnable
            .into_iter()
            .find(|t| t.kind == TaskKind::HealthCheck && &t.app == app)
    }
}
