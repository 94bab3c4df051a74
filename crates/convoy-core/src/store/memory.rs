//! In-memory task store with an optional JSON snapshot on disk.
//!
//! Design:
//! - One `Mutex` guards the whole map; every operation completes its
//!   read-modify-write under that lock, which gives per-id atomicity and a
//!   globally consistent runnable view for free.
//! - A `Notify` wakes dispatch loops after mutations.
//! - When a snapshot path is set, the full task list is written after each
//!   mutation and reloaded on startup. The layout is an implementation
//!   detail; callers only see the `TaskRecord` schema.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{DeploymentId, NewTask, TaskId, TaskRecord, TaskStatus};
use crate::error::OrchestratorError;
use crate::ports::{Clock, IdGenerator, TaskCounts, TaskStore};

struct StoreState {
    tasks: HashMap<TaskId, TaskRecord>,
    /// Creation order, for deterministic listings.
    order: Vec<TaskId>,
}

impl StoreState {
    fn empty() -> Self {
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn from_records(records: Vec<TaskRecord>) -> Self {
        let mut state = Self::empty();
        for record in records {
            state.order.push(record.id);
            state.tasks.insert(record.id, record);
        }
        state
    }

    fn dependencies_satisfied(&self, record: &TaskRecord) -> bool {
        record.depends_on.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.status.satisfies_dependency())
        })
    }

    fn records_in_order(&self) -> Vec<TaskRecord> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }
}

pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(StoreState::empty()),
            notify: Notify::new(),
            clock,
            ids,
            snapshot_path: None,
        }
    }

    /// Open a store backed by a snapshot file, loading any existing
    /// contents. Tasks found `Running` in the snapshot are a crashed
    /// process's leftovers; the dispatcher's startup `recover_stale` scan
    /// picks them up.
    pub fn with_snapshot(
        path: PathBuf,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, OrchestratorError> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let records: Vec<TaskRecord> =
                serde_json::from_str(&contents).map_err(|e| OrchestratorError::Snapshot {
                    path: path.clone(),
                    source: e,
                })?;
            StoreState::from_records(records)
        } else {
            StoreState::empty()
        };
        Ok(Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            clock,
            ids,
            snapshot_path: Some(path),
        })
    }

    fn persist(&self, state: &StoreState) -> Result<(), OrchestratorError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let records = state.records_in_order();
        let contents =
            serde_json::to_string_pretty(&records).map_err(|e| OrchestratorError::Snapshot {
                path: path.clone(),
                source: e,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Persist variant for operations that cannot surface an error; a
    /// failed snapshot write is logged and the in-memory state stays
    /// authoritative until the next successful write.
    fn persist_or_warn(&self, state: &StoreState) {
        if let Err(err) = self.persist(state) {
            tracing::warn!(error = %err, "task store snapshot write failed");
        }
    }

    fn apply_transition(
        &self,
        record: &mut TaskRecord,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        if !record.status.can_transition_to(status) {
            return Err(OrchestratorError::InvalidTransition {
                task: record.id,
                from: record.status,
                to: status,
            });
        }
        match status {
            TaskStatus::Pending => record.requeue(now),
            TaskStatus::Running => record.start_attempt(now),
            TaskStatus::Succeeded => record.mark_succeeded(result, now),
            TaskStatus::Failed => record.mark_failed(result, now),
            TaskStatus::Retrying => record.schedule_retry(next_run_at.unwrap_or(now), now),
            TaskStatus::Done => {
                if result.is_some() {
                    record.result = result;
                }
                record.finalize(now);
            }
            TaskStatus::Abandoned => record.abandon(now),
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, spec: NewTask) -> Result<TaskRecord, OrchestratorError> {
        let mut state = self.state.lock().await;
        let id = self.ids.next_task_id();
        let record = TaskRecord::create(id, spec, self.clock.now());
        state.order.push(id);
        state.tasks.insert(id, record.clone());
        self.persist(&state)?;
        drop(state);
        self.notify.notify_one();
        Ok(record)
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, OrchestratorError> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<TaskRecord, OrchestratorError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = state
            .tasks
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::NotFound(id))?;
        self.apply_transition(&mut record, status, result, None, now)?;
        state.tasks.insert(id, record.clone());
        self.persist(&state)?;
        drop(state);
        self.notify.notify_one();
        Ok(record)
    }

    async fn schedule_retry(
        &self,
        id: TaskId,
        next_run_at: DateTime<Utc>,
        result: Option<serde_json::Value>,
    ) -> Result<TaskRecord, OrchestratorError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut record = state
            .tasks
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::NotFound(id))?;
        if result.is_some() {
            record.result = result;
        }
        self.apply_transition(&mut record, TaskStatus::Retrying, None, Some(next_run_at), now)?;
        state.tasks.insert(id, record.clone());
        self.persist(&state)?;
        drop(state);
        self.notify.notify_one();
        Ok(record)
    }

    async fn list_runnable(&self) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        state
            .records_in_order()
            .into_iter()
            .filter(|r| r.status.is_runnable() && state.dependencies_satisfied(r))
            .collect()
    }

    async fn list_by_deployment(&self, deployment: &DeploymentId) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        state
            .records_in_order()
            .into_iter()
            .filter(|r| r.deployment.as_ref() == Some(deployment))
            .collect()
    }

    async fn claim_runnable(&self) -> Option<TaskRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = state.order.iter().copied().find(|id| {
            state
                .tasks
                .get(id)
                .is_some_and(|r| r.status.is_runnable() && state.dependencies_satisfied(r))
        })?;
        let record = state.tasks.get_mut(&id)?;
        record.start_attempt(now);
        let claimed = record.clone();
        self.persist_or_warn(&state);
        Some(claimed)
    }

    async fn promote_due(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let due: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|r| {
                r.status == TaskStatus::Retrying
                    && r.next_run_at.is_none_or(|at| at <= now)
            })
            .map(|r| r.id)
            .collect();
        for id in &due {
            if let Some(record) = state.tasks.get_mut(id) {
                record.requeue(now);
            }
        }
        let promoted = due.len();
        if promoted > 0 {
            self.persist_or_warn(&state);
            drop(state);
            self.notify.notify_one();
        }
        promoted
    }

    async fn recover_stale(&self, staleness: Duration) -> Vec<TaskRecord> {
        let now = self.clock.now();
        let cutoff = now
            - chrono::Duration::from_std(staleness).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = self.state.lock().await;
        let stale: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|r| r.status == TaskStatus::Running && r.updated_at <= cutoff)
            .map(|r| r.id)
            .collect();
        let mut recovered = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(record) = state.tasks.get_mut(&id) {
                // Due immediately; the crashed attempt was already counted
                // when the task was claimed.
                record.schedule_retry(now, now);
                recovered.push(record.clone());
            }
        }
        if !recovered.is_empty() {
            self.persist_or_warn(&state);
            drop(state);
            self.notify.notify_one();
        }
        recovered
    }

    async fn abandon_blocked(&self) -> Vec<TaskRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut cascaded = Vec::new();
        // Abandonment can chain through dependents; iterate to a fixpoint.
        loop {
            let blocked: Vec<TaskId> = state
                .tasks
                .values()
                .filter(|r| {
                    r.status == TaskStatus::Pending
                        && r.depends_on.iter().any(|dep| {
                            state
                                .tasks
                                .get(dep)
                                .is_some_and(|d| d.status == TaskStatus::Abandoned)
                        })
                })
                .map(|r| r.id)
                .collect();
            if blocked.is_empty() {
                break;
            }
            for id in blocked {
                if let Some(record) = state.tasks.get_mut(&id) {
                    record.abandon(now);
                    cascaded.push(record.clone());
                }
            }
        }
        if !cascaded.is_empty() {
            self.persist_or_warn(&state);
        }
        cascaded
    }

    async fn counts(&self) -> TaskCounts {
        let state = self.state.lock().await;
        let mut counts = TaskCounts::default();
        for record in state.tasks.values() {
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Retrying => counts.retrying += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Abandoned => counts.abandoned += 1,
            }
        }
        counts
    }

    async fn list_all(&self) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        state.records_in_order()
    }

    async fn changed(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AppName, NewTask, TaskKind};
    use crate::ports::{FixedClock, SystemClock, UlidGenerator};
    use chrono::TimeZone;

    fn store() -> InMemoryTaskStore {
        let clock = Arc::new(SystemClock);
        InMemoryTaskStore::new(clock.clone(), Arc::new(UlidGenerator::new(SystemClock)))
    }

    fn fixed_store(clock: FixedClock) -> InMemoryTaskStore {
        InMemoryTaskStore::new(
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock)),
        )
    }

    fn test_task(app: &str) -> NewTask {
        NewTask::new(TaskKind::Test, AppName::from(app), 3)
    }

    #[tokio::test]
    async fn create_initializes_pending_with_fresh_id() {
        let store = store();
        let a = store.create(test_task("a")).await.unwrap();
        let b = store.create(test_task("b")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.attempts, 0);
        assert_eq!(store.get(a.id).await.unwrap().app, AppName::from("a"));
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = store();
        let ghost = TaskId::from_ulid(ulid::Ulid::new());
        assert!(matches!(
            store.get(ghost).await,
            Err(OrchestratorError::NotFound(id)) if id == ghost
        ));
    }

    #[tokio::test]
    async fn update_status_rejects_illegal_edges() {
        let store = store();
        let task = store.create(test_task("a")).await.unwrap();

        let err = store
            .update_status(task.id, TaskStatus::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Succeeded,
                ..
            }
        ));

        // The record is untouched after a rejected update.
        assert_eq!(store.get(task.id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_states_never_regress() {
        let store = store();
        let task = store.create(test_task("a")).await.unwrap();
        store.update_status(task.id, TaskStatus::Running, None).await.unwrap();
        store.update_status(task.id, TaskStatus::Succeeded, None).await.unwrap();
        store.update_status(task.id, TaskStatus::Done, None).await.unwrap();

        for next in [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Retrying] {
            assert!(store.update_status(task.id, next, None).await.is_err());
        }
    }

    #[tokio::test]
    async fn claim_skips_tasks_with_unmet_dependencies() {
        let store = store();
        let upstream = store.create(test_task("a")).await.unwrap();
        let downstream = store
            .create(test_task("a").depends_on(upstream.id))
            .await
            .unwrap();

        let claimed = store.claim_runnable().await.unwrap();
        assert_eq!(claimed.id, upstream.id);
        assert_eq!(claimed.attempts, 1);

        // Upstream is Running now, downstream still blocked: nothing left.
        assert!(store.claim_runnable().await.is_none());

        store
            .update_status(upstream.id, TaskStatus::Succeeded, None)
            .await
            .unwrap();
        let next = store.claim_runnable().await.unwrap();
        assert_eq!(next.id, downstream.id);
    }

    #[tokio::test]
    async fn done_after_failure_still_satisfies_dependencies() {
        // A conditional downstream task must become runnable when its
        // trigger settles Failed -> Done; it checks the verdict itself.
        let store = store();
        let trigger = store.create(test_task("a")).await.unwrap();
        let rollback = store
            .create(test_task("a").depends_on(trigger.id))
            .await
            .unwrap();

        store.update_status(trigger.id, TaskStatus::Running, None).await.unwrap();
        store.update_status(trigger.id, TaskStatus::Failed, None).await.unwrap();
        assert!(store.list_runnable().await.is_empty());

        store.update_status(trigger.id, TaskStatus::Done, None).await.unwrap();
        let runnable = store.list_runnable().await;
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].id, rollback.id);
    }

    #[tokio::test]
    async fn running_tasks_are_never_listed_runnable() {
        let store = store();
        let task = store.create(test_task("a")).await.unwrap();
        store.claim_runnable().await.unwrap();

        assert!(store.list_runnable().await.is_empty());
        assert!(store.claim_runnable().await.is_none());
        assert_eq!(store.get(task.id).await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_distinct_tasks() {
        let store = Arc::new(store());
        for i in 0..8 {
            store.create(test_task(&format!("app-{i}"))).await.unwrap();
        }

        let mut claims = Vec::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.claim_runnable().await })
            })
            .collect();
        for handle in handles {
            if let Some(record) = handle.await.unwrap() {
                claims.push(record.id);
            }
        }

        let mut unique = claims.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(claims.len(), 8);
        assert_eq!(unique.len(), 8, "no task may be claimed twice");
    }

    #[tokio::test]
    async fn list_by_deployment_filters_and_preserves_order() {
        let store = store();
        let dep = DeploymentId::from("dep-1");
        let first = store
            .create(test_task("a").with_deployment(dep.clone(), "prod"))
            .await
            .unwrap();
        store.create(test_task("b")).await.unwrap();
        let second = store
            .create(test_task("a").with_deployment(dep.clone(), "prod"))
            .await
            .unwrap();

        let batch = store.list_by_deployment(&dep).await;
        assert_eq!(
            batch.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn promote_due_respects_the_backoff_deadline() {
        let start = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        let store = fixed_store(clock.clone());

        let task = store.create(test_task("a")).await.unwrap();
        store.update_status(task.id, TaskStatus::Running, None).await.unwrap();
        store.update_status(task.id, TaskStatus::Failed, None).await.unwrap();
        store
            .schedule_retry(task.id, start + chrono::Duration::seconds(30), None)
            .await
            .unwrap();

        assert_eq!(store.promote_due().await, 0, "deadline not reached yet");

        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(store.promote_due().await, 1);
        let record = store.get(task.id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.next_run_at.is_none());
    }

    #[tokio::test]
    async fn recover_stale_requeues_without_a_second_attempt() {
        let start = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        let store = fixed_store(clock.clone());

        let task = store.create(test_task("a")).await.unwrap();
        let claimed = store.claim_runnable().await.unwrap();
        assert_eq!(claimed.attempts, 1);

        // Not stale yet.
        clock.advance(chrono::Duration::seconds(10));
        assert!(store.recover_stale(Duration::from_secs(300)).await.is_empty());

        clock.advance(chrono::Duration::seconds(600));
        let recovered = store.recover_stale(Duration::from_secs(300)).await;
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].status, TaskStatus::Retrying);
        assert_eq!(recovered[0].attempts, 1, "crashed attempt counted exactly once");

        // Due immediately: the next promote makes it runnable again.
        assert_eq!(store.promote_due().await, 1);
        assert_eq!(store.claim_runnable().await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn abandon_blocked_cascades_through_chains() {
        let store = store();
        let a = store.create(test_task("a")).await.unwrap();
        let b = store.create(test_task("a").depends_on(a.id)).await.unwrap();
        let c = store.create(test_task("a").depends_on(b.id)).await.unwrap();

        store.update_status(a.id, TaskStatus::Running, None).await.unwrap();
        store.update_status(a.id, TaskStatus::Retrying, None).await.unwrap();
        store.update_status(a.id, TaskStatus::Abandoned, None).await.unwrap();

        let cascaded = store.abandon_blocked().await;
        let mut ids: Vec<TaskId> = cascaded.iter().map(|t| t.id).collect();
        ids.sort();
        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(store.counts().await.abandoned, 3);
    }

    #[tokio::test]
    async fn snapshot_roundtrips_the_task_graph() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let clock = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(SystemClock));

        let (task_id, dep_id) = {
            let store =
                InMemoryTaskStore::with_snapshot(path.clone(), clock.clone(), ids.clone()).unwrap();
            let dep = DeploymentId::from("dep-9");
            let first = store
                .create(test_task("a").with_deployment(dep.clone(), "prod"))
                .await
                .unwrap();
            let second = store
                .create(test_task("a").depends_on(first.id))
                .await
                .unwrap();
            store.update_status(first.id, TaskStatus::Running, None).await.unwrap();
            (second.id, first.id)
        };

        let reopened = InMemoryTaskStore::with_snapshot(path, clock, ids).unwrap();
        let all = reopened.list_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, dep_id);
        assert_eq!(all[0].status, TaskStatus::Running);
        assert_eq!(all[1].id, task_id);
        assert_eq!(all[1].depends_on, vec![dep_id]);
    }

    #[tokio::test]
    async fn snapshot_load_then_stale_recovery() {
        // Crash consistency: a task persisted as Running is recovered into
        // Retrying by the startup scan, one attempt on the books.
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let start = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        let ids = Arc::new(UlidGenerator::new(clock.clone()));

        {
            let store = InMemoryTaskStore::with_snapshot(
                path.clone(),
                Arc::new(clock.clone()),
                ids.clone(),
            )
            .unwrap();
            store.create(test_task("a")).await.unwrap();
            store.claim_runnable().await.unwrap();
        }

        clock.advance(chrono::Duration::seconds(600));
        let store =
            InMemoryTaskStore::with_snapshot(path, Arc::new(clock), ids).unwrap();
        let recovered = store.recover_stale(Duration::from_secs(300)).await;
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].attempts, 1);
        assert_eq!(recovered[0].status, TaskStatus::Retrying);
    }
}
