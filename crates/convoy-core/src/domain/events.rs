//! Alert-worthy events pushed to the notification sink.

use serde::{Deserialize, Serialize};

use super::descriptor::{AppName, DeploymentId};
use super::ids::TaskId;
use super::task::TaskKind;

/// Structured notification payload. Delivery transport is the sink
/// implementation's concern; the engine only guarantees emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    /// An app's consecutive-failure streak crossed the configured threshold.
    HealthThresholdBreached {
        app: AppName,
        consecutive_failures: u32,
    },

    /// A task ran out of retries on a transient failure and was abandoned.
    TaskAbandoned {
        task: TaskId,
        app: AppName,
        kind: TaskKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A conditional rollback fired because its trigger task failed.
    RollbackTriggered {
        task: TaskId,
        app: AppName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deployment: Option<DeploymentId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        environment: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn events_serialize_with_a_tag() {
        let event = AlertEvent::TaskAbandoned {
            task: TaskId::from_ulid(Ulid::new()),
            app: AppName::from("chat-bot"),
            kind: TaskKind::Test,
            error: Some("timeout".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "task_abandoned");
        assert_eq!(value["kind"], "test");
    }
}
