//! Isolated validation of one app: dependency resolution, then the app's
//! test command, both under a deadline.
//!
//! The runner never errors at the orchestration layer. Every way a pass
//! can go wrong (missing manifest, unresolvable dependencies, timeout,
//! failing tests) is a classified verdict in the returned `TestResult`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::OrchestratorConfig;
use crate::domain::{AppDescriptor, FailureKind, TestResult};

enum StepOutcome {
    Completed { exit_code: Option<i32>, output: String },
    TimedOut,
    SpawnFailed(String),
}

pub struct TestRunner {
    manifest_name: String,
    resolve_command: Vec<String>,
    timeout: Duration,
    output_budget: usize,
}

impl TestRunner {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            manifest_name: config.manifest_name.clone(),
            resolve_command: config.test.resolve_command.clone(),
            timeout: config.test_timeout(),
            output_budget: config.test.output_budget_bytes,
        }
    }

    /// One validation pass. Fast-fails on a missing manifest with zero
    /// processes spawned.
    pub async fn run(&self, descriptor: &AppDescriptor) -> TestResult {
        if !descriptor.has_manifest {
            return TestResult::manifest_missing(&self.manifest_name);
        }

        // Per-run scratch directory: resolution artifacts and temp files
        // land here and die with the run, so concurrent apps cannot
        // pollute each other. Dropped on every exit path, timeouts included.
        let scratch = match tempfile::TempDir::new() {
            Ok(dir) => dir,
            Err(err) => {
                return TestResult::failed(
                    FailureKind::DependencyError,
                    None,
                    format!("failed to create scratch dir: {err}"),
                );
            }
        };

        let mut log = String::new();

        if !self.resolve_command.is_empty() {
            let mut argv = self.resolve_command.clone();
            argv.push(
                descriptor
                    .manifest_path(&self.manifest_name)
                    .to_string_lossy()
                    .into_owned(),
            );
            match self.run_step(&argv, &descriptor.path, scratch.path()).await {
                StepOutcome::Completed { exit_code: Some(0), output } => {
                    log.push_str(&output);
                }
                StepOutcome::Completed { exit_code, output } => {
                    log.push_str(&output);
                    return TestResult::failed(
                        FailureKind::DependencyError,
                        exit_code,
                        self.truncate(log),
                    );
                }
                StepOutcome::TimedOut => {
                    log.push_str("dependency resolution exceeded the deadline\n");
                    return TestResult::failed(FailureKind::Timeout, None, self.truncate(log));
                }
                StepOutcome::SpawnFailed(err) => {
                    return TestResult::failed(
                        FailureKind::DependencyError,
                        None,
                        self.truncate(format!("resolve spawn failed: {err}")),
                    );
                }
            }
        }

        let Some(test_command) = &descriptor.test_command else {
            log.push_str("no test command declared; dependency manifest validated\n");
            return TestResult::passed(0, self.truncate(log));
        };
        let argv: Vec<String> = test_command.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            log.push_str("empty test command; dependency manifest validated\n");
            return TestResult::passed(0, self.truncate(log));
        }

        match self.run_step(&argv, &descriptor.path, scratch.path()).await {
            StepOutcome::Completed { exit_code: Some(0), output } => {
                log.push_str(&output);
                TestResult::passed(0, self.truncate(log))
            }
            StepOutcome::Completed { exit_code, output } => {
                log.push_str(&output);
                TestResult::failed(FailureKind::TestFailure, exit_code, self.truncate(log))
            }
            StepOutcome::TimedOut => {
                log.push_str("test command exceeded the deadline\n");
                TestResult::failed(FailureKind::Timeout, None, self.truncate(log))
            }
            StepOutcome::SpawnFailed(err) => TestResult::failed(
                FailureKind::TestFailure,
                None,
                self.truncate(format!("test spawn failed: {err}")),
            ),
        }
    }

    async fn run_step(&self, argv: &[String], cwd: &Path, scratch: &Path) -> StepOutcome {
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(cwd)
            .env("TMPDIR", scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return StepOutcome::SpawnFailed(err.to_string()),
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                StepOutcome::Completed {
                    exit_code: output.status.code(),
                    output: combined,
                }
            }
            Ok(Err(err)) => StepOutcome::SpawnFailed(err.to_string()),
            // Dropping the in-flight future kills the child (kill_on_drop).
            Err(_) => StepOutcome::TimedOut,
        }
    }

    /// Keep the tail of the log: that is where the failure summary lives.
    fn truncate(&self, log: String) -> String {
        if log.len() <= self.output_budget {
            return log;
        }
        let mut start = log.len() - self.output_budget;
        while !log.is_char_boundary(start) {
            start += 1;
        }
        format!("[...truncated]\n{}", &log[start..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::domain::AppName;
    use tempfile::TempDir;

    fn config_with(resolve: &[&str], timeout_secs: u64) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.test.resolve_command = resolve.iter().map(|s| s.to_string()).collect();
        config.test.timeout_secs = timeout_secs;
        config
    }

    fn app_dir(manifest: bool) -> (TempDir, AppDescriptor) {
        let dir = TempDir::new().unwrap();
        if manifest {
            std::fs::write(dir.path().join("requirements.txt"), "requests\n").unwrap();
        }
        let descriptor = AppDescriptor {
            name: AppName::from("sample"),
            path: dir.path().to_path_buf(),
            has_manifest: manifest,
            test_command: None,
            has_tests: false,
            has_docker: false,
        };
        (dir, descriptor)
    }

    #[tokio::test]
    async fn missing_manifest_fast_fails_without_spawning() {
        // The resolve command does not exist; if anything were spawned the
        // verdict would be DependencyError instead.
        let config = config_with(&["definitely-not-a-real-binary"], 5);
        let runner = TestRunner::new(&config);
        let (_dir, descriptor) = app_dir(false);

        let result = runner.run(&descriptor).await;
        assert!(!result.passed);
        assert_eq!(result.reason, Some(FailureKind::ManifestMissing));
        assert!(result.exit_code.is_none());
    }

    #[tokio::test]
    async fn resolution_failure_is_a_dependency_error() {
        let config = config_with(&["false"], 5);
        let runner = TestRunner::new(&config);
        let (_dir, descriptor) = app_dir(true);

        let result = runner.run(&descriptor).await;
        assert!(!result.passed);
        assert_eq!(result.reason, Some(FailureKind::DependencyError));
    }

    #[tokio::test]
    async fn passing_test_command_yields_a_pass() {
        let config = config_with(&["true"], 5);
        let runner = TestRunner::new(&config);
        let (_dir, mut descriptor) = app_dir(true);
        descriptor.test_command = Some("true".to_string());

        let result = runner.run(&descriptor).await;
        assert!(result.passed);
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failing_test_command_is_a_test_failure() {
        let config = config_with(&["true"], 5);
        let runner = TestRunner::new(&config);
        let (_dir, mut descriptor) = app_dir(true);
        descriptor.test_command = Some("false".to_string());

        let result = runner.run(&descriptor).await;
        assert!(!result.passed);
        assert_eq!(result.reason, Some(FailureKind::TestFailure));
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn slow_test_command_times_out() {
        let config = config_with(&["true"], 1);
        let runner = TestRunner::new(&config);
        let (_dir, mut descriptor) = app_dir(true);
        descriptor.test_command = Some("sleep 30".to_string());

        let result = runner.run(&descriptor).await;
        assert!(!result.passed);
        assert_eq!(result.reason, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn manifest_only_apps_pass_on_resolution_alone() {
        let config = config_with(&["true"], 5);
        let runner = TestRunner::new(&config);
        let (_dir, descriptor) = app_dir(true);

        let result = runner.run(&descriptor).await;
        assert!(result.passed);
        assert!(result.log_excerpt.contains("no test command"));
    }

    #[tokio::test]
    async fn long_output_is_truncated_to_the_tail() {
        let mut config = config_with(&[], 5);
        config.test.output_budget_bytes = 64;
        let runner = TestRunner::new(&config);
        let (dir, mut descriptor) = app_dir(true);
        std::fs::write(
            dir.path().join("spam.sh"),
            "#!/bin/sh\ni=0\nwhile [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done\necho FINAL\n",
        )
        .unwrap();
        descriptor.test_command = Some(format!("sh {}", dir.path().join("spam.sh").display()));

        let result = runner.run(&descriptor).await;
        assert!(result.passed);
        assert!(result.log_excerpt.len() <= 64 + "[...truncated]\n".len());
        assert!(result.log_excerpt.contains("FINAL"), "tail must be kept");
    }
}
