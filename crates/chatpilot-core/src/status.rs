//! Status surface
//!
//! Background components report user-visible outcomes here instead of
//! touching any UI. Subscribers that lag simply miss old events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A user-visible status notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "snake_case")]
pub enum StatusEvent {
    Info(String),
    Warning(String),
    /// Requires acknowledgement, e.g. a rate-limit stop
    Blocking(String),
}

impl StatusEvent {
    pub fn message(&self) -> &str {
        match self {
            StatusEvent::Info(m) | StatusEvent::Warning(m) | StatusEvent::Blocking(m) => m,
        }
    }
}

/// Broadcasts status events and mirrors them into the log
#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        match &event {
            StatusEvent::Info(m) => info!(status = %m, "Status"),
            StatusEvent::Warning(m) => warn!(status = %m, "Status warning"),
            StatusEvent::Blocking(m) => warn!(status = %m, "Blocking notice"),
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(StatusEvent::Info(message.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(StatusEvent::Warning(message.into()));
    }

    pub fn blocking(&self, message: impl Into<String>) {
        self.publish(StatusEvent::Blocking(message.into()));
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(64)
    }
}
