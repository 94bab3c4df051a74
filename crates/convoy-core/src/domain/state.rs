//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Status of a task in the store.
///
/// Legal transitions:
/// - `Pending -> Running`
/// - `Pending -> Abandoned` (dependency cascade: a prerequisite was abandoned,
///   so this task can never become runnable)
/// - `Running -> Succeeded | Failed | Retrying`
///   (`Running -> Retrying` only happens through crash recovery)
/// - `Succeeded -> Done`
/// - `Failed -> Done | Retrying`
/// - `Retrying -> Pending | Abandoned`
///
/// `Done` and `Abandoned` are terminal. No task ever leaves a terminal
/// status, and the store rejects any edge outside this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to run (possibly blocked on dependencies).
    Pending,

    /// Claimed by a worker and executing.
    Running,

    /// Last attempt finished with a passing outcome.
    Succeeded,

    /// Last attempt finished with a failing outcome.
    Failed,

    /// Waiting out a backoff delay before going back to `Pending`.
    Retrying,

    /// Finalized; outcome (pass or fail) is recorded in the result payload.
    Done,

    /// Retry ceiling exhausted on a transient failure. Surfaced to the
    /// notification sink, never silently dropped.
    Abandoned,
}

impl TaskStatus {
    /// No further transitions allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Abandoned)
    }

    /// Eligible for claiming, dependencies permitting.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Counts as a satisfied dependency for downstream tasks.
    ///
    /// `Done` satisfies regardless of the recorded outcome: a conditional
    /// downstream task consults the trigger outcome itself.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Done)
    }

    /// Whether `self -> next` is a legal edge in the transition table.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Abandoned)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Retrying)
                | (Succeeded, Done)
                | (Failed, Done)
                | (Failed, Retrying)
                | (Retrying, Pending)
                | (Retrying, Abandoned)
        )
    }
}
