//! Notification sink for alert-worthy events.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::AlertEvent;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: AlertEvent);
}

/// Logs every event as a structured warning. The default sink for the CLI;
/// operators route a real channel (chat, pager) behind this trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: AlertEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{event:?}"));
        tracing::warn!(alert = %payload, "alert event");
    }
}

/// Buffers events for assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().expect("event lock poisoned").clone()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: AlertEvent) {
        self.events.lock().expect("event lock poisoned").push(event);
    }
}
