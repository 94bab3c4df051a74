//! Expand one deployment event into its follow-up batch. Idempotent per
//! deployment id.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use convoy_core::followup;

use super::{load_config, open_store};

#[derive(Args, Debug)]
pub struct CreateFollowupTasksArgs {
    /// Application name.
    #[arg(long)]
    pub app_name: String,

    /// Deployment identifier correlating the batch.
    #[arg(long)]
    pub deployment_id: String,

    /// Deployment environment.
    #[arg(long, default_value = "staging")]
    pub environment: String,

    /// Repository root (holds the task store snapshot).
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Config file (defaults to convoy.yaml under the repo root).
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

impl CreateFollowupTasksArgs {
    pub async fn run(self) -> Result<()> {
        let config = load_config(&self.repo_path, self.config_file.as_deref())?;
        let store = open_store(&self.repo_path)?;

        let batch = followup::generate(
            store.as_ref(),
            &config,
            self.app_name.as_str().into(),
            self.deployment_id.as_str().into(),
            &self.environment,
        )
        .await?;

        if batch.created {
            println!(
                "Created {} follow-up task(s) for {} ({})",
                batch.tasks.len(),
                self.app_name,
                self.deployment_id
            );
        } else {
            println!(
                "Follow-up batch for {} already exists ({} task(s))",
                self.deployment_id,
                batch.tasks.len()
            );
        }
        for task in &batch.tasks {
            println!("  {} {}", task.kind.as_str(), task.id);
        }
        Ok(())
    }
}
