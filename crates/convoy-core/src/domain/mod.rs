//! Domain model: ids, tasks, descriptors, health records, outcomes, events.

pub mod descriptor;
pub mod events;
pub mod health;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use descriptor::{AppDescriptor, AppName, DeploymentId};
pub use events::AlertEvent;
pub use health::{HealthCheckOutcome, HealthRecord, HealthStatus};
pub use ids::TaskId;
pub use outcome::{ExecutionOutcome, FailureKind, TestResult};
pub use state::TaskStatus;
pub use task::{NewTask, TaskKind, TaskRecord, TaskVerdict, TriggerCondition};
