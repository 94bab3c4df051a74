//! Validate a single app directory through the dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use convoy_core::dispatch::{default_registry, Dispatcher};
use convoy_core::domain::{NewTask, TaskKind, TaskVerdict};
use convoy_core::ports::{
    InMemoryMetrics, SystemClock, TaskStore, TcpProbe, TracingEventSink, UlidGenerator,
};
use convoy_core::store::InMemoryTaskStore;
use convoy_core::OrchestratorConfig;

#[derive(Args, Debug)]
pub struct TestAppArgs {
    /// App directory to validate.
    #[arg(long)]
    pub app_path: PathBuf,

    /// Config file; defaults apply when absent.
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

impl TestAppArgs {
    pub async fn run(self) -> Result<()> {
        let config = match &self.config_file {
            Some(path) => OrchestratorConfig::load(path)?,
            None => OrchestratorConfig::default(),
        };

        let name = self
            .app_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.app_path.display().to_string());

        // A single validation is ephemeral; no snapshot needed.
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        ));
        let executors = default_registry(&config, Arc::new(TcpProbe), Arc::new(TracingEventSink))?;
        let dispatcher = Dispatcher::new(
            &config,
            Arc::clone(&store),
            executors,
            Arc::new(SystemClock),
            Arc::new(TracingEventSink),
            Arc::new(InMemoryMetrics::new()),
        );

        let task = store
            .create(
                NewTask::new(TaskKind::Test, name.as_str().into(), config.retry.max_attempts)
                    .with_payload(serde_json::json!({ "app_path": self.app_path })),
            )
            .await?;
        dispatcher.run_until_idle().await;

        let record = store.get(task.id).await?;
        match record.verdict {
            Some(TaskVerdict::Passed) => println!("{name}: passed"),
            _ => {
                let reason = record
                    .result
                    .as_ref()
                    .and_then(|r| r.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown");
                println!("{name}: failed ({reason}), {} attempt(s)", record.attempts);
                if let Some(excerpt) = record
                    .result
                    .as_ref()
                    .and_then(|r| r.get("log_excerpt"))
                    .and_then(|r| r.as_str())
                {
                    if !excerpt.is_empty() {
                        println!("--- log ---\n{excerpt}");
                    }
                }
            }
        }
        // A failing app is reported data, not an engine failure.
        Ok(())
    }
}
