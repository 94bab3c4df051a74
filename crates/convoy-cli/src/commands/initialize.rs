//! First-run setup: default config, registry scan, persisted app registry.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use convoy_core::registry;

use super::{load_config, resolve_roots};

#[derive(Args, Debug)]
pub struct InitializeArgs {
    /// Repository root.
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Config file (defaults to convoy.yaml under the repo root).
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

impl InitializeArgs {
    pub async fn run(self) -> Result<()> {
        let config = load_config(&self.repo_path, self.config_file.as_deref())?;
        let roots = resolve_roots(&self.repo_path, &config);

        let report = registry::scan(&roots, &config);
        let registry_path = registry::save_registry(&self.repo_path, &report)?;

        tracing::info!(
            apps = report.apps.len(),
            skipped = report.skipped.len(),
            registry = %registry_path.display(),
            "repository initialized"
        );
        println!(
            "Discovered {} app(s); registry written to {}",
            report.apps.len(),
            registry_path.display()
        );
        for app in &report.apps {
            let manifest = if app.has_manifest { "manifest" } else { "no manifest" };
            println!("  {} ({manifest})", app.name);
        }
        for skipped in &report.skipped {
            println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
        }
        Ok(())
    }
}
