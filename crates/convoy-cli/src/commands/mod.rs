//! Subcommand implementations. Each maps 1:1 to a core operation.

pub mod check_all;
pub mod create_followup_tasks;
pub mod initialize;
pub mod monitor;
pub mod test_app;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use convoy_core::ports::{SystemClock, UlidGenerator};
use convoy_core::store::InMemoryTaskStore;
use convoy_core::OrchestratorConfig;

/// Default config file name under the repo root.
pub const CONFIG_FILE: &str = "convoy.yaml";

/// Task store snapshot under the repo root; shared by the one-shot
/// commands and monitor mode so follow-up batches survive restarts.
pub const TASK_SNAPSHOT_FILE: &str = "convoy_tasks.json";

/// Load the repo's config, creating the default file on first use.
pub fn load_config(repo_path: &Path, config_file: Option<&Path>) -> Result<OrchestratorConfig> {
    let path = match config_file {
        Some(path) => path.to_path_buf(),
        None => repo_path.join(CONFIG_FILE),
    };
    Ok(OrchestratorConfig::load_or_init(&path)?)
}

/// Scan roots from the config, resolved against the repo path when
/// relative.
pub fn resolve_roots(repo_path: &Path, config: &OrchestratorConfig) -> Vec<PathBuf> {
    config
        .scan_roots
        .iter()
        .map(|root| {
            if root.is_absolute() {
                root.clone()
            } else {
                repo_path.join(root)
            }
        })
        .collect()
}

/// Open the repo's persistent task store.
pub fn open_store(repo_path: &Path) -> Result<Arc<InMemoryTaskStore>> {
    let store = InMemoryTaskStore::with_snapshot(
        repo_path.join(TASK_SNAPSHOT_FILE),
        Arc::new(SystemClock),
        Arc::new(UlidGenerator::new(SystemClock)),
    )?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_roots_resolve_against_the_repo() {
        let config = OrchestratorConfig::default();
        let roots = resolve_roots(Path::new("/srv/catalog"), &config);
        assert_eq!(roots, vec![PathBuf::from("/srv/catalog/.")]);
    }

    #[test]
    fn absolute_roots_are_kept() {
        let mut config = OrchestratorConfig::default();
        config.scan_roots = vec![PathBuf::from("/opt/apps")];
        let roots = resolve_roots(Path::new("/srv/catalog"), &config);
        assert_eq!(roots, vec![PathBuf::from("/opt/apps")]);
    }

    #[test]
    fn load_config_creates_the_default_file() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }
}
