//! End-to-end flows: discovery, fleet validation, follow-up batches, and
//! health-driven rollback, wired the way the CLI wires them.

use std::path::Path;
use std::sync::Arc;

use convoy_core::config::{MonitoredApp, OrchestratorConfig};
use convoy_core::dispatch::{default_registry, Dispatcher};
use convoy_core::domain::{
    AlertEvent, AppName, DeploymentId, NewTask, TaskKind, TaskStatus, TaskVerdict,
};
use convoy_core::ports::{
    CollectingEventSink, InMemoryMetrics, SystemClock, TaskStore, TcpProbe, UlidGenerator,
};
use convoy_core::store::InMemoryTaskStore;
use convoy_core::{followup, registry};
use tempfile::TempDir;

fn write_app(root: &Path, name: &str, manifest: bool, test_exit: Option<i32>) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    if manifest {
        std::fs::write(dir.join("requirements.txt"), "requests==2.31.0\n").unwrap();
    }
    if let Some(code) = test_exit {
        std::fs::create_dir_all(dir.join("tests")).unwrap();
        std::fs::write(dir.join("run_tests.sh"), format!("#!/bin/sh\nexit {code}\n")).unwrap();
    }
}

fn fast_config(root: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.scan_roots = vec![root.to_path_buf()];
    config.worker_budget = 2;
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 1;
    config.test.resolve_command = vec!["true".into()];
    config.test.default_test_command = "sh run_tests.sh".into();
    config.health.probe_timeout_ms = 200;
    config
}

struct Engine {
    store: Arc<InMemoryTaskStore>,
    dispatcher: Dispatcher,
    events: Arc<CollectingEventSink>,
}

fn engine(config: &OrchestratorConfig) -> Engine {
    let store = Arc::new(InMemoryTaskStore::new(
        Arc::new(SystemClock),
        Arc::new(UlidGenerator::new(SystemClock)),
    ));
    let events = Arc::new(CollectingEventSink::new());
    let executors = default_registry(config, Arc::new(TcpProbe), events.clone()).unwrap();
    let dispatcher = Dispatcher::new(
        config,
        store.clone() as Arc<dyn TaskStore>,
        executors,
        Arc::new(SystemClock),
        events.clone(),
        Arc::new(InMemoryMetrics::new()),
    );
    Engine {
        store,
        dispatcher,
        events,
    }
}

#[tokio::test]
async fn fleet_validation_settles_every_app() {
    let root = TempDir::new().unwrap();
    write_app(root.path(), "a", true, Some(0));
    write_app(root.path(), "b", true, Some(1));
    write_app(root.path(), "c", false, None);
    let config = fast_config(root.path());

    let report = registry::scan(&config.scan_roots, &config);
    assert_eq!(report.apps.len(), 3, "all three apps get descriptors");

    let eng = engine(&config);
    let mut ids = Vec::new();
    for app in &report.apps {
        let task = eng
            .store
            .create(
                NewTask::new(TaskKind::Test, app.name.clone(), config.retry.max_attempts)
                    .with_payload(serde_json::json!({ "app_path": app.path })),
            )
            .await
            .unwrap();
        ids.push((app.name.clone(), task.id));
    }

    eng.dispatcher.run_until_idle().await;

    for (name, id) in ids {
        let record = eng.store.get(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        let reason = record
            .result
            .as_ref()
            .and_then(|r| r.get("reason"))
            .and_then(|r| r.as_str())
            .map(str::to_owned);
        match name.0.as_str() {
            "a" => {
                assert_eq!(record.verdict, Some(TaskVerdict::Passed));
                assert_eq!(record.attempts, 1);
            }
            "b" => {
                assert_eq!(record.verdict, Some(TaskVerdict::Failed));
                assert_eq!(reason.as_deref(), Some("test_failure"));
                assert_eq!(record.attempts, config.retry.max_attempts);
            }
            "c" => {
                assert_eq!(record.verdict, Some(TaskVerdict::Failed));
                assert_eq!(reason.as_deref(), Some("manifest_missing"));
                assert_eq!(record.attempts, 1);
            }
            other => panic!("unexpected app {other}"),
        }
    }
}

#[tokio::test]
async fn deployment_follow_ups_roll_back_when_health_fails() {
    let root = TempDir::new().unwrap();
    write_app(root.path(), "chat-bot", true, Some(0));
    let mut config = fast_config(root.path());
    config.retry.max_attempts = 1;
    // Bind and drop a listener so the port is free again: the probe gets
    // an immediate refusal, the health check fails its one attempt, and
    // the rollback's trigger condition is met.
    let dead_endpoint = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    config.apps = vec![MonitoredApp {
        name: AppName::from("chat-bot"),
        endpoint: dead_endpoint,
        environment: Some("prod".into()),
    }];

    let eng = engine(&config);
    let batch = followup::generate(
        eng.store.as_ref(),
        &config,
        AppName::from("chat-bot"),
        DeploymentId::from("dep-42"),
        "prod",
    )
    .await
    .unwrap();
    assert!(batch.created);

    // Idempotence: a duplicate submission changes nothing.
    let again = followup::generate(
        eng.store.as_ref(),
        &config,
        AppName::from("chat-bot"),
        DeploymentId::from("dep-42"),
        "prod",
    )
    .await
    .unwrap();
    assert!(!again.created);
    assert_eq!(
        eng.store
            .list_by_deployment(&DeploymentId::from("dep-42"))
            .await
            .len(),
        3
    );

    eng.dispatcher.run_until_idle().await;

    let smoke = eng.store.get(batch.tasks[0].id).await.unwrap();
    assert_eq!(smoke.verdict, Some(TaskVerdict::Passed));

    let health = eng.store.get(batch.tasks[1].id).await.unwrap();
    assert_eq!(health.status, TaskStatus::Done);
    assert_eq!(health.verdict, Some(TaskVerdict::Failed));

    let rollback = eng.store.get(batch.tasks[2].id).await.unwrap();
    assert_eq!(rollback.status, TaskStatus::Done);
    assert_eq!(rollback.verdict, Some(TaskVerdict::Passed));
    assert!(
        eng.events
            .events()
            .iter()
            .any(|e| matches!(e, AlertEvent::RollbackTriggered { app, .. } if app.0 == "chat-bot")),
        "rollback must be surfaced to the notification sink"
    );
}

#[tokio::test]
async fn deployment_follow_ups_skip_rollback_when_health_passes() {
    let root = TempDir::new().unwrap();
    write_app(root.path(), "chat-bot", true, Some(0));
    let mut config = fast_config(root.path());

    // A live listener: the health check passes and the rollback is skipped.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    config.apps = vec![MonitoredApp {
        name: AppName::from("chat-bot"),
        endpoint: listener.local_addr().unwrap().to_string(),
        environment: Some("prod".into()),
    }];

    let eng = engine(&config);
    let batch = followup::generate(
        eng.store.as_ref(),
        &config,
        AppName::from("chat-bot"),
        DeploymentId::from("dep-43"),
        "prod",
    )
    .await
    .unwrap();

    eng.dispatcher.run_until_idle().await;

    let rollback = eng.store.get(batch.tasks[2].id).await.unwrap();
    assert_eq!(rollback.status, TaskStatus::Done);
    assert_eq!(rollback.result.as_ref().unwrap()["skipped"], true);
    assert!(
        !eng.events
            .events()
            .iter()
            .any(|e| matches!(e, AlertEvent::RollbackTriggered { .. })),
        "a skipped rollback must not fire the event"
    );
}
