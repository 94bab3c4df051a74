//! Liveness probe strategy.
//!
//! The protocol is pluggable: the scheduler only needs "reachable or not,
//! with an error string". The stock implementation is a TCP connect against
//! the app's declared endpoint; tests swap in scripted probes.

use async_trait::async_trait;

use crate::config::MonitoredApp;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One liveness check. The caller enforces the per-probe timeout;
    /// implementations should simply attempt the check.
    async fn probe(&self, app: &MonitoredApp) -> Result<(), String>;
}

/// Reachability probe: a successful TCP connect to `endpoint` counts as
/// healthy. Cheap enough to run every tick against the whole fleet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, app: &MonitoredApp) -> Result<(), String> {
        tokio::net::TcpStream::connect(&app.endpoint)
            .await
            .map(|_| ())
            .map_err(|e| format!("connect {}: {e}", app.endpoint))
    }
}
