//! Service mode: recurring health ticks plus dispatcher workers, until
//! ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use convoy_core::dispatch::{default_registry, Dispatcher};
use convoy_core::health::HealthScheduler;
use convoy_core::ports::{InMemoryMetrics, SystemClock, TaskStore, TcpProbe, TracingEventSink};
use convoy_core::OrchestratorConfig;

use super::open_store;

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Monitoring configuration file.
    #[arg(long)]
    pub config_file: PathBuf,

    /// Repository root (holds the task store snapshot).
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,
}

impl MonitorArgs {
    pub async fn run(self) -> Result<()> {
        let config = OrchestratorConfig::load_or_init(&self.config_file)?;
        if config.apps.is_empty() {
            tracing::warn!("no monitored apps configured; only queued tasks will be processed");
        }

        let store = open_store(&self.repo_path)?;
        let store: Arc<dyn TaskStore> = store;
        let events = Arc::new(TracingEventSink);
        let metrics = Arc::new(InMemoryMetrics::new());
        let probe = Arc::new(TcpProbe);

        let executors = default_registry(&config, probe.clone(), events.clone())?;
        let dispatcher = Dispatcher::new(
            &config,
            Arc::clone(&store),
            executors,
            Arc::new(SystemClock),
            events.clone(),
            metrics.clone(),
        );
        let scheduler = HealthScheduler::new(
            &config,
            probe,
            Arc::clone(&store),
            events,
            metrics.clone(),
        );

        // Crash recovery happens inside start(); workers serve until ctrl-c.
        let group = dispatcher.start().await;
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(config.health.interval_secs.max(1)));
        tracing::info!(
            apps = config.apps.len(),
            interval_secs = config.health.interval_secs,
            "monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcomes = scheduler.tick(Utc::now()).await;
                    for outcome in &outcomes {
                        if outcome.healthy {
                            tracing::info!(app = %outcome.app, "healthy");
                        } else {
                            tracing::warn!(
                                app = %outcome.app,
                                failures = outcome.consecutive_failures,
                                breached = outcome.threshold_breached,
                                error = outcome.error.as_deref().unwrap_or("unknown"),
                                "unhealthy"
                            );
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received ctrl-c, shutting down monitor");
                    break;
                }
            }
        }

        // Let in-flight tasks finish rather than leaving them Running.
        group.shutdown_and_join().await;

        let counts = store.counts().await;
        println!(
            "monitor stopped: {} done, {} abandoned, {} still pending",
            counts.done, counts.abandoned, counts.pending
        );
        Ok(())
    }
}
