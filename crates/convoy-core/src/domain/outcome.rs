//! Result shapes for validation runs and dispatched executions.
//!
//! A failing app is data, not an engine error: these types flow into task
//! result payloads and drive the retry/settle policy, but they never become
//! `Err` at the orchestration layer.

use serde::{Deserialize, Serialize};

/// Why a validation or execution attempt did not pass.
///
/// The split matters operationally: `Timeout` and `DependencyError` are
/// transient and feed the retry path, while `TestFailure` and
/// `ManifestMissing` are verdicts about the app itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The app directory has no dependency manifest. Fast-fail; nothing
    /// was executed.
    ManifestMissing,

    /// Dependency resolution exited nonzero.
    DependencyError,

    /// A bounded step exceeded its deadline and was killed.
    Timeout,

    /// The test command ran to completion and exited nonzero.
    TestFailure,
}

impl FailureKind {
    /// Transient failures are worth another attempt; verdicts are not
    /// (though flaky test failures get retried by policy, see dispatcher).
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::DependencyError)
    }
}

/// Structured result of one validation pass over an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureKind>,
    /// Exit code of the step that decided the verdict, when one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr, truncated to the configured byte budget.
    pub log_excerpt: String,
}

impl TestResult {
    pub fn passed(exit_code: i32, log_excerpt: String) -> Self {
        Self {
            passed: true,
            reason: None,
            exit_code: Some(exit_code),
            log_excerpt,
        }
    }

    pub fn failed(reason: FailureKind, exit_code: Option<i32>, log_excerpt: String) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            exit_code,
            log_excerpt,
        }
    }

    pub fn manifest_missing(manifest_name: &str) -> Self {
        Self::failed(
            FailureKind::ManifestMissing,
            None,
            format!("no {manifest_name} found at the app root; skipped execution"),
        )
    }
}

/// What an executor reports back to the dispatcher for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Passed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
    Failed {
        reason: FailureKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
}

impl ExecutionOutcome {
    pub fn passed() -> Self {
        Self::Passed { detail: None }
    }

    pub fn passed_with(detail: serde_json::Value) -> Self {
        Self::Passed {
            detail: Some(detail),
        }
    }

    pub fn failed(reason: FailureKind, detail: serde_json::Value) -> Self {
        Self::Failed {
            reason,
            detail: Some(detail),
        }
    }

    pub fn detail(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Passed { detail } | Self::Failed { detail, .. } => detail.as_ref(),
        }
    }
}

impl From<TestResult> for ExecutionOutcome {
    fn from(result: TestResult) -> Self {
        let detail = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        if result.passed {
            ExecutionOutcome::passed_with(detail)
        } else {
            ExecutionOutcome::failed(
                result.reason.unwrap_or(FailureKind::TestFailure),
                detail,
            )
        }
    }
}
