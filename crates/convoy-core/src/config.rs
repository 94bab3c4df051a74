//! Engine configuration.
//!
//! One YAML file with serde defaults on every section, so a partial file
//! (or none at all) yields a working setup. `load_or_init` writes the
//! defaults back on first run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::AppName;
use crate::error::OrchestratorError;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directories scanned for app subdirectories.
    pub scan_roots: Vec<PathBuf>,

    /// Dependency manifest file identifying an app directory.
    pub manifest_name: String,

    /// Number of dispatcher workers.
    pub worker_budget: usize,

    pub retry: RetryConfig,
    pub test: TestConfig,
    pub health: HealthConfig,

    /// A task left `Running` longer than this is treated as
    /// abandoned-by-crash on the next dispatcher startup.
    pub staleness_threshold_secs: u64,

    /// Apps with an active deployment, probed by the health scheduler.
    pub apps: Vec<MonitoredApp>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scan_roots: vec![PathBuf::from(".")],
            manifest_name: "requirements.txt".to_string(),
            worker_budget: 4,
            retry: RetryConfig::default(),
            test: TestConfig::default(),
            health: HealthConfig::default(),
            staleness_threshold_secs: 300,
            apps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt ceiling, counting the first attempt.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Deadline for each step of a validation pass (resolve, test).
    pub timeout_secs: u64,

    /// Captured output is truncated to this many bytes.
    pub output_budget_bytes: usize,

    /// Dependency resolution command, run from the app directory with the
    /// manifest path appended. Empty disables the resolve step.
    pub resolve_command: Vec<String>,

    /// Test command used when an app has a tests directory but no declared
    /// command of its own.
    pub default_test_command: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            output_budget_bytes: 16 * 1024,
            resolve_command: vec![
                "python3".into(),
                "-m".into(),
                "pip".into(),
                "install".into(),
                "--dry-run".into(),
                "-r".into(),
            ],
            default_test_command: "python3 -m pytest tests -q".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between scheduler ticks in monitor mode.
    pub interval_secs: u64,

    /// Per-probe deadline. A slow probe counts as a failure.
    pub probe_timeout_ms: u64,

    /// Consecutive failures that trigger the alert + failed task.
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_ms: 5_000,
            failure_threshold: 3,
        }
    }
}

/// One app with an active deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredApp {
    pub name: AppName,
    /// `host:port` probed for reachability.
    pub endpoint: String,
    #[serde(default)]
    pub environment: Option<String>,
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| OrchestratorError::Config {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the config, writing the default file first when none exists.
    pub fn load_or_init(path: &Path) -> Result<Self, OrchestratorError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), OrchestratorError> {
        let contents = serde_yaml::to_string(self).map_err(|e| OrchestratorError::Config {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health.probe_timeout_ms)
    }
}
