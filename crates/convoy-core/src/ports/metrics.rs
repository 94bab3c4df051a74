//! Metrics sink.
//!
//! The engine emits counters (task throughput, per-kind success/failure)
//! and gauges (health failure streaks). Transport is the sink's concern;
//! the in-process implementation just aggregates for inspection.

use std::collections::HashMap;
use std::sync::Mutex;

pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str);
    fn set_gauge(&self, name: &str, value: u64);
}

/// Aggregating in-process sink. The CLI reads it back to print a summary;
/// tests assert on it directly.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
    }

    pub fn counters_snapshot(&self) -> HashMap<String, u64> {
        self.counters.lock().expect("metrics lock poisoned").clone()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &str) {
        *self
            .counters
            .lock()
            .expect("metrics lock poisoned")
            .entry(name.to_string())
            .or_insert(0) += 1;
    }

    fn set_gauge(&self, name: &str, value: u64) {
        self.gauges
            .lock()
            .expect("metrics lock poisoned")
            .insert(name.to_string(), value);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &str) {}
    fn set_gauge(&self, _name: &str, _value: u64) {}
}
