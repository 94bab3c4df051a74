//! Rolling per-app health state, distinct from the task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::descriptor::AppName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Never probed yet.
    Unknown,
}

/// Rolling liveness state for one app. Owned by the health scheduler;
/// read-only everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub app: AppName,
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl HealthRecord {
    pub fn unknown(app: AppName) -> Self {
        Self {
            app,
            status: HealthStatus::Unknown,
            last_check: None,
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.status = HealthStatus::Healthy;
        self.last_check = Some(now);
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.status = HealthStatus::Unhealthy;
        self.last_check = Some(now);
        self.consecutive_failures += 1;
    }
}

/// One probe's result, as reported by `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckOutcome {
    pub app: AppName,
    pub healthy: bool,
    /// Probe failure detail (connection refused, timeout, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub consecutive_failures: u32,
    /// The failure streak crossed the configured threshold on this tick.
    pub threshold_breached: bool,
}
