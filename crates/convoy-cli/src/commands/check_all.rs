//! Fleet-wide validation through the same bounded dispatcher as `test-app`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use convoy_core::dispatch::{default_registry, Dispatcher};
use convoy_core::domain::{NewTask, TaskKind, TaskVerdict};
use convoy_core::ports::{InMemoryMetrics, SystemClock, TaskStore, TcpProbe, TracingEventSink};
use convoy_core::registry;

use super::{load_config, open_store, resolve_roots};

#[derive(Args, Debug)]
pub struct CheckAllArgs {
    /// Repository root.
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Config file (defaults to convoy.yaml under the repo root).
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

impl CheckAllArgs {
    pub async fn run(self) -> Result<()> {
        let config = load_config(&self.repo_path, self.config_file.as_deref())?;
        let roots = resolve_roots(&self.repo_path, &config);
        let report = registry::scan(&roots, &config);
        if report.apps.is_empty() {
            println!("No apps discovered under {}", self.repo_path.display());
            return Ok(());
        }

        let store = open_store(&self.repo_path)?;
        let store: Arc<dyn TaskStore> = store;
        let metrics = Arc::new(InMemoryMetrics::new());
        let executors = default_registry(&config, Arc::new(TcpProbe), Arc::new(TracingEventSink))?;
        let dispatcher = Dispatcher::new(
            &config,
            Arc::clone(&store),
            executors,
            Arc::new(SystemClock),
            Arc::new(TracingEventSink),
            metrics.clone(),
        );

        let mut ids = Vec::with_capacity(report.apps.len());
        for app in &report.apps {
            let task = store
                .create(
                    NewTask::new(TaskKind::Test, app.name.clone(), config.retry.max_attempts)
                        .with_payload(serde_json::json!({ "app_path": app.path })),
                )
                .await?;
            ids.push((app.name.clone(), task.id));
        }

        dispatcher.run_until_idle().await;

        let mut failed = 0usize;
        for (name, id) in ids {
            let record = store.get(id).await?;
            match record.verdict {
                Some(TaskVerdict::Passed) => println!("  ok    {name}"),
                _ => {
                    failed += 1;
                    let reason = record
                        .result
                        .as_ref()
                        .and_then(|r| r.get("reason"))
                        .and_then(|r| r.as_str())
                        .unwrap_or("unknown");
                    println!("  FAIL  {name} ({reason}, {} attempt(s))", record.attempts);
                }
            }
        }
        println!(
            "{}/{} app(s) passed; {} task(s) dispatched",
            report.apps.len() - failed,
            report.apps.len(),
            metrics.counter("dispatch.claimed")
        );
        Ok(())
    }
}
