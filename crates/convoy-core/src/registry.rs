//! App discovery.
//!
//! One directory level below each scan root: one subdirectory = one app.
//! The scan fails soft per entry; an unreadable directory is reported and
//! skipped, never fatal. Descriptors come back sorted by path so every
//! downstream pass sees a stable order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::domain::{AppDescriptor, AppName};
use crate::error::OrchestratorError;

const TEST_DIR_NAMES: &[&str] = &["tests", "test", "testing"];

/// Result of one scan pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub apps: Vec<AppDescriptor>,
    /// Entries that could not be read, with the reason.
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Walk the scan roots and build descriptors for every app directory.
pub fn scan(roots: &[PathBuf], config: &OrchestratorConfig) -> ScanReport {
    let mut report = ScanReport::default();

    for root in roots {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "scan root unreadable");
                report.skipped.push(SkippedEntry {
                    path: root.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report.skipped.push(SkippedEntry {
                        path: root.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => {
                    report.apps.push(describe(&path, name, config));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "entry unreadable");
                    report.skipped.push(SkippedEntry {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    report.apps.sort_by(|a, b| a.path.cmp(&b.path));
    report
}

/// Build the descriptor for a single app directory. Public so `test-app`
/// can target a path that is not under any scan root.
pub fn describe(path: &Path, name: String, config: &OrchestratorConfig) -> AppDescriptor {
    let has_manifest = path.join(&config.manifest_name).is_file();
    let has_tests = TEST_DIR_NAMES.iter().any(|d| path.join(d).is_dir());
    let has_docker = path.join("Dockerfile").is_file();
    // No per-app declared command yet; apps with a tests directory get the
    // configured default.
    let test_command = has_tests.then(|| config.test.default_test_command.clone());

    AppDescriptor {
        name: AppName::from(name),
        path: path.to_path_buf(),
        has_manifest,
        test_command,
        has_tests,
        has_docker,
    }
}

/// Persist the scan as `app_registry.json` under the repo root and return
/// the file path.
pub fn save_registry(repo_path: &Path, report: &ScanReport) -> Result<PathBuf, OrchestratorError> {
    let path = repo_path.join("app_registry.json");
    let contents =
        serde_json::to_string_pretty(&report.apps).map_err(|e| OrchestratorError::Snapshot {
            path: path.clone(),
            source: e,
        })?;
    std::fs::write(&path, contents)?;
    Ok(path)
}
