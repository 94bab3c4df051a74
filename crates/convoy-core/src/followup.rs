//! Deployment follow-up expansion.
//!
//! One deployment event expands into a fixed, dependency-ordered template:
//! smoke test, then a health check gated on the smoke test, then a rollback
//! gated on the health check and executed only if the health check failed.
//! The rollback's "run on failure" is a trigger reference the dispatcher
//! consults, not a branching construct in the store: dependencies stay a
//! pure partial order.

use serde_json::json;

use crate::config::OrchestratorConfig;
use crate::domain::{AppName, DeploymentId, NewTask, TaskKind, TaskRecord, TaskStatus};
use crate::error::OrchestratorError;
use crate::ports::TaskStore;

/// The template's three tasks, in dependency order.
#[derive(Debug, Clone)]
pub struct FollowUpBatch {
    pub tasks: Vec<TaskRecord>,
    /// False when an existing batch was found and nothing was created.
    pub created: bool,
}

/// Expand one deployment event into its follow-up tasks.
///
/// Idempotent per deployment id: re-submission (a retried webhook, a
/// double-fired pipeline step) finds the existing live batch and creates
/// nothing. Only a batch that was abandoned wholesale is replaced.
pub async fn generate(
    store: &dyn TaskStore,
    config: &OrchestratorConfig,
    app: AppName,
    deployment: DeploymentId,
    environment: &str,
) -> Result<FollowUpBatch, OrchestratorError> {
    let existing = store.list_by_deployment(&deployment).await;
    if !existing.is_empty()
        && existing.iter().any(|t| t.status != TaskStatus::Abandoned)
    {
        tracing::debug!(
            deployment = %deployment,
            tasks = existing.len(),
            "follow-up batch already exists"
        );
        return Ok(FollowUpBatch {
            tasks: existing,
            created: false,
        });
    }

    let max_attempts = config.retry.max_attempts;

    let smoke = store
        .create(
            NewTask::new(TaskKind::Test, app.clone(), max_attempts)
                .with_deployment(deployment.clone(), environment)
                .with_payload(json!({ "app": app.0, "stage": "smoke" })),
        )
        .await?;

    let health_check = store
        .create(
            NewTask::new(TaskKind::HealthCheck, app.clone(), max_attempts)
                .with_deployment(deployment.clone(), environment)
                .depends_on(smoke.id)
                .with_payload(json!({ "app": app.0 })),
        )
        .await?;

    let rollback = store
        .create(
            NewTask::new(TaskKind::Rollback, app.clone(), max_attempts)
                .with_deployment(deployment.clone(), environment)
                .depends_on(health_check.id)
                .triggered_by_failure_of(health_check.id)
                .with_payload(json!({ "app": app.0, "deployment": deployment.0 })),
        )
        .await?;

    tracing::info!(
        app = %app,
        deployment = %deployment,
        environment,
        "created follow-up batch"
    );

    Ok(FollowUpBatch {
        tasks: vec![smoke, health_check, rollback],
        created: true,
    })
}
